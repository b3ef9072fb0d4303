//! Portfolio valuation
//!
//! Keeps the cached metrics of a portfolio and its holdings consistent with
//! the latest prices. A refresh runs two ordered passes: holdings are valued
//! first, weights are assigned only once the portfolio total is final.

use chrono::NaiveDate;
use std::cmp::Ordering;

use crate::db::Repository;
use crate::error::{Error, Result};
use crate::models::{Holding, Portfolio};
use crate::quotes::PriceFeed;

/// Outcome of a revaluation that has not been persisted yet
#[derive(Debug, Clone)]
pub struct Revaluation {
    pub portfolio: Portfolio,
    /// Ids of zero-share holdings dropped from `portfolio`
    pub removed: Vec<i64>,
}

pub struct ValuationEngine<'a> {
    feed: &'a dyn PriceFeed,
}

impl<'a> ValuationEngine<'a> {
    pub fn new(feed: &'a dyn PriceFeed) -> Self {
        Self { feed }
    }

    pub fn feed(&self) -> &'a dyn PriceFeed {
        self.feed
    }

    /// Recompute every derived metric on a copy of `portfolio`.
    ///
    /// Prices are looked up at most once per holding per `as_of` day. Any
    /// lookup failure aborts the whole revaluation.
    pub fn revalue(&self, portfolio: &Portfolio, as_of: NaiveDate) -> Result<Revaluation> {
        let mut next = portfolio.clone();

        // Pass 1: holding values
        for holding in next.holdings.iter_mut() {
            if holding.shares > 0 && holding.price_date != Some(as_of) {
                let latest = self.feed.latest(&holding.symbol)?;
                let price = latest.quote.close;
                if !price.is_finite() || price <= 0.0 {
                    return Err(Error::DataUnavailable {
                        symbol: holding.symbol.clone(),
                        reason: format!("unusable price {}", price),
                    });
                }
                log::debug!("{}: last price {} (quote date {})", holding.symbol, price, latest.quote.date);
                holding.last_price = price;
                holding.price_date = Some(as_of);
            }
            value_holding(holding);
        }

        // Portfolio totals
        let holdings_value: f64 = next.holdings.iter().map(|h| h.market_value).sum();
        let invested: f64 = next
            .holdings
            .iter()
            .map(|h| h.shares as f64 * h.purchase_price)
            .sum();
        next.market_value = next.cash + holdings_value;
        next.invested = invested;
        next.total_profit = next.market_value - invested - next.cash;
        next.profit_pct = if invested != 0.0 {
            next.total_profit / invested
        } else {
            0.0
        };

        // Pass 2: weights against the final total
        let total = next.market_value;
        for holding in next.holdings.iter_mut() {
            holding.weight_pct = if total != 0.0 {
                holding.market_value / total
            } else {
                0.0
            };
        }

        let removed: Vec<i64> = next
            .holdings
            .iter()
            .filter(|h| h.shares == 0)
            .filter_map(|h| h.id)
            .collect();
        next.holdings.retain(|h| h.shares != 0);
        next.holding_count = next.holdings.len();

        Ok(Revaluation {
            portfolio: next,
            removed,
        })
    }

    /// Revalue and persist in one transaction. On error neither `portfolio`
    /// nor the store is changed.
    pub fn refresh(&self, repo: &dyn Repository, portfolio: &mut Portfolio, as_of: NaiveDate) -> Result<()> {
        let Revaluation {
            portfolio: mut next,
            removed,
        } = self.revalue(portfolio, as_of)?;

        repo.save_portfolio(&mut next, &removed)?;
        sort_by_weight(&mut next.holdings);

        log::info!(
            "Refreshed '{}': market value {:.2}, {} holdings, {} pruned",
            next.name,
            next.market_value,
            next.holding_count,
            removed.len()
        );
        *portfolio = next;
        Ok(())
    }
}

fn value_holding(holding: &mut Holding) {
    let shares = holding.shares as f64;
    holding.market_value = shares * holding.last_price;
    holding.total_profit = shares * (holding.last_price - holding.purchase_price);
    holding.profit_pct = if holding.purchase_price != 0.0 {
        holding.last_price / holding.purchase_price - 1.0
    } else {
        0.0
    };
}

fn sort_by_weight(holdings: &mut [Holding]) {
    holdings.sort_by(|a, b| b.weight_pct.partial_cmp(&a.weight_pct).unwrap_or(Ordering::Equal));
}
