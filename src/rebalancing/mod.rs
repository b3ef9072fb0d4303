//! Optimized shadow portfolio
//!
//! Copies a portfolio to `<name>_opt` and converts target weights into whole
//! share counts at the last known prices, then tops up or draws down cash so
//! the copy is worth exactly what the original was.

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::Repository;
use crate::error::{Error, Result};
use crate::models::Portfolio;
use crate::valuation::ValuationEngine;

/// Calculated rebalancing action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceAction {
    pub symbol: String,
    pub target_weight: f64,
    pub price: f64,
    pub shares_before: i64,
    pub shares_after: i64,
    pub target_value: f64,
}

impl RebalanceAction {
    /// Positive when shares are bought, negative when sold
    pub fn share_change(&self) -> i64 {
        self.shares_after - self.shares_before
    }
}

/// Create `<name>_opt` as a copy of `source`, replacing any earlier copy.
///
/// Cash, holdings, last prices and price stamps are carried over so the
/// copy can be revalued without new price lookups.
pub fn materialize_optimal(repo: &dyn Repository, source: &Portfolio) -> Result<Portfolio> {
    let shadow_name = source.shadow_name();
    if repo.find_portfolio(&shadow_name)?.is_some() {
        log::info!("Replacing existing optimized portfolio '{}'", shadow_name);
        repo.delete_portfolio(&shadow_name)?;
    }

    let created = repo.create_portfolio(&shadow_name, source.cash)?;
    let mut shadow = source.clone();
    shadow.id = created.id;
    shadow.name = created.name;
    for holding in shadow.holdings.iter_mut() {
        holding.id = None;
        holding.portfolio_id = shadow.id;
    }

    repo.save_portfolio(&mut shadow, &[])?;
    Ok(shadow)
}

/// Resize the holdings of `shadow` to `weights` of `total_balance`.
///
/// Symbols are processed in the order of `weights`, and actions come back in
/// that order. Each symbol's allocation goes to its first lot; further lots of
/// the same symbol are zeroed and pruned by the refresh. Afterwards cash absorbs the
/// rounding so the market value equals `target_value`.
#[allow(clippy::too_many_arguments)]
pub fn rebalance(
    engine: &ValuationEngine<'_>,
    repo: &dyn Repository,
    shadow: &mut Portfolio,
    symbols: &[String],
    weights: &[f64],
    total_balance: f64,
    target_value: f64,
    as_of: NaiveDate,
) -> Result<Vec<RebalanceAction>> {
    if symbols.len() != weights.len() {
        return Err(Error::InvalidInput(format!(
            "{} weights for {} symbols",
            weights.len(),
            symbols.len()
        )));
    }

    let mut actions = Vec::with_capacity(symbols.len());
    for (symbol, &weight) in symbols.iter().zip(weights) {

        let mut lots = shadow.holdings.iter_mut().filter(|h| &h.symbol == symbol);
        let first = lots.next().ok_or_else(|| {
            Error::InvalidInput(format!("{} is not held by '{}'", symbol, shadow.name))
        })?;

        let price = first.last_price;
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::DataUnavailable {
                symbol: symbol.clone(),
                reason: format!("no usable last price ({})", price),
            });
        }

        let value = weight * total_balance;
        let shares = (value / price).round() as i64;
        let mut shares_before = first.shares;
        first.shares = shares;
        first.purchase_price = price;

        for extra in lots {
            shares_before += extra.shares;
            extra.shares = 0;
        }

        log::debug!(
            "{}: weight {:.4}, {} -> {} shares at {:.4}",
            symbol,
            weight,
            shares_before,
            shares,
            price
        );
        actions.push(RebalanceAction {
            symbol: symbol.clone(),
            target_weight: weight,
            price,
            shares_before,
            shares_after: shares,
            target_value: value,
        });
    }

    engine.refresh(repo, shadow, as_of)?;

    shadow.cash += target_value - shadow.market_value;
    if shadow.cash < 0.0 {
        log::warn!(
            "Optimized portfolio '{}' ends with negative cash {:.2}",
            shadow.name,
            shadow.cash
        );
    }
    engine.refresh(repo, shadow, as_of)?;

    log::info!(
        "Rebalanced '{}' to {} positions, market value {:.2}, cash {:.2}",
        shadow.name,
        shadow.holding_count,
        shadow.market_value,
        shadow.cash
    );
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRepository;
    use crate::models::{Holding, NewHolding};
    use crate::quotes::ManualFeed;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn feed() -> ManualFeed {
        ManualFeed::new()
            .with_closes("AAPL", &[(today(), 150.0)])
            .with_closes("MSFT", &[(today(), 250.0)])
    }

    fn add(portfolio: &mut Portfolio, symbol: &str, shares: i64, cost: f64) {
        let holding = Holding::new(
            portfolio.id(),
            &NewHolding {
                symbol: symbol.to_string(),
                shares,
                purchase_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                purchase_price: cost,
            },
        )
        .unwrap();
        portfolio.holdings.push(holding);
    }

    fn refreshed_tech(repo: &SqliteRepository, engine: &ValuationEngine<'_>) -> Portfolio {
        let mut portfolio = repo.create_portfolio("Tech", 1000.0).unwrap();
        add(&mut portfolio, "AAPL", 10, 100.0);
        add(&mut portfolio, "MSFT", 5, 200.0);
        engine.refresh(repo, &mut portfolio, today()).unwrap();
        portfolio
    }

    #[test]
    fn test_materialize_copies_holdings_and_stamps() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let feed = feed();
        let engine = ValuationEngine::new(&feed);
        let source = refreshed_tech(&repo, &engine);

        let shadow = materialize_optimal(&repo, &source).unwrap();
        assert_eq!(shadow.name(), "Tech_opt");
        assert_eq!(shadow.cash(), 1000.0);
        assert_eq!(shadow.holdings().len(), 2);
        for (copy, orig) in shadow.holdings().iter().zip(source.holdings()) {
            assert_eq!(copy.symbol(), orig.symbol());
            assert_eq!(copy.last_price(), orig.last_price());
            assert_eq!(copy.price_date(), Some(today()));
            assert_ne!(copy.id(), orig.id());
        }
        assert_eq!(repo.get_portfolio("Tech_opt").unwrap().holdings().len(), 2);
    }

    #[test]
    fn test_materialize_replaces_existing_shadow() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let feed = feed();
        let engine = ValuationEngine::new(&feed);
        let source = refreshed_tech(&repo, &engine);

        let first = materialize_optimal(&repo, &source).unwrap();
        let second = materialize_optimal(&repo, &source).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(repo.list_portfolios(Default::default()).unwrap().len(), 2);
        let held: i64 = repo
            .connection()
            .query_row("SELECT COUNT(*) FROM holding", [], |row| row.get(0))
            .unwrap();
        assert_eq!(held, 4);
    }

    #[test]
    fn test_rebalance_conserves_market_value() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let feed = feed();
        let engine = ValuationEngine::new(&feed);
        let source = refreshed_tech(&repo, &engine);
        let mut shadow = materialize_optimal(&repo, &source).unwrap();

        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        let actions = rebalance(
            &engine,
            &repo,
            &mut shadow,
            &symbols,
            &[0.4, 0.6],
            source.market_value() - source.cash(),
            source.market_value(),
            today(),
        )
        .unwrap();

        // 0.4 * 2750 / 150 = 7.33 -> 7; 0.6 * 2750 / 250 = 6.6 -> 7
        assert_eq!(actions[0].symbol, "AAPL");
        assert_eq!(actions[0].shares_after, 7);
        assert_eq!(actions[0].share_change(), -3);
        assert_eq!(actions[1].symbol, "MSFT");
        assert_eq!(actions[1].shares_after, 7);

        assert!((shadow.market_value() - source.market_value()).abs() < 1e-9);
        assert!((shadow.cash() - (3750.0 - 1750.0 - 1050.0)).abs() < 1e-9);
        assert_eq!(shadow.holdings()[0].purchase_price(), 250.0);

        let stored = repo.get_portfolio("Tech_opt").unwrap();
        assert!((stored.market_value() - 3750.0).abs() < 1e-9);
        assert_eq!(feed.latest_calls(), 2);
    }

    #[test]
    fn test_duplicate_lots_collapse_into_first() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let feed = feed();
        let engine = ValuationEngine::new(&feed);
        let mut source = repo.create_portfolio("Dup", 0.0).unwrap();
        add(&mut source, "AAPL", 2, 100.0);
        add(&mut source, "AAPL", 3, 120.0);
        add(&mut source, "MSFT", 1, 200.0);
        engine.refresh(&repo, &mut source, today()).unwrap();

        let mut shadow = materialize_optimal(&repo, &source).unwrap();
        let symbols = source.symbols();
        let weights = vec![0.5; symbols.len()];
        let actions = rebalance(
            &engine,
            &repo,
            &mut shadow,
            &symbols,
            &weights,
            source.market_value(),
            source.market_value(),
            today(),
        )
        .unwrap();

        let aapl = actions.iter().find(|a| a.symbol == "AAPL").unwrap();
        assert_eq!(aapl.shares_before, 5);
        let lots: Vec<_> = shadow.holdings().iter().filter(|h| h.symbol() == "AAPL").collect();
        assert_eq!(lots.len(), 1);
        assert!((shadow.market_value() - source.market_value()).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_lots_follow_weight_order() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let feed = feed();
        let engine = ValuationEngine::new(&feed);
        let mut source = repo.create_portfolio("Split", 0.0).unwrap();
        add(&mut source, "AAPL", 4, 100.0);
        add(&mut source, "MSFT", 2, 200.0);
        add(&mut source, "AAPL", 1, 130.0);
        engine.refresh(&repo, &mut source, today()).unwrap();

        let mut shadow = materialize_optimal(&repo, &source).unwrap();
        // Smaller weight first: the order of the weight vector wins
        let symbols = vec!["MSFT".to_string(), "AAPL".to_string()];
        let actions = rebalance(
            &engine,
            &repo,
            &mut shadow,
            &symbols,
            &[0.25, 0.75],
            1000.0,
            source.market_value(),
            today(),
        )
        .unwrap();

        let order: Vec<&str> = actions.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(order, vec!["MSFT", "AAPL"]);
        // 0.25 * 1000 / 250 = 1; 0.75 * 1000 / 150 = 5
        assert_eq!(actions[0].shares_after, 1);
        assert_eq!(actions[1].shares_before, 5);
        assert_eq!(actions[1].shares_after, 5);

        let aapl: Vec<_> = shadow.holdings().iter().filter(|h| h.symbol() == "AAPL").collect();
        assert_eq!(aapl.len(), 1);
        assert_eq!(aapl[0].shares(), 5);
        assert!((shadow.market_value() - source.market_value()).abs() < 1e-9);
    }

    #[test]
    fn test_overshoot_leaves_negative_cash() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let feed = feed();
        let engine = ValuationEngine::new(&feed);
        let mut source = repo.create_portfolio("Tight", 0.0).unwrap();
        add(&mut source, "MSFT", 1, 200.0);
        engine.refresh(&repo, &mut source, today()).unwrap();

        let mut shadow = materialize_optimal(&repo, &source).unwrap();
        // round(400 / 250) = 2 shares worth 500 against a 250 target
        rebalance(&engine, &repo, &mut shadow, &["MSFT".to_string()], &[1.0], 400.0, 250.0, today()).unwrap();
        assert!((shadow.cash() + 250.0).abs() < 1e-9);
        assert!((shadow.market_value() - 250.0).abs() < 1e-9);
    }
}
