//! Daily log-return table for the symbols of a portfolio

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

use super::{AssetStats, TRADING_DAYS};
use crate::error::{Error, Result};
use crate::models::Portfolio;
use crate::quotes::PriceFeed;

/// Rows are trading days, columns are symbols.
#[derive(Debug, Clone)]
pub struct ReturnSeries {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    returns: DMatrix<f64>,
}

impl ReturnSeries {
    /// Fetch closes for every distinct symbol in `portfolio` over
    /// `[start, as_of]`, keep the dates all symbols share and take log returns.
    pub fn build(
        feed: &dyn PriceFeed,
        portfolio: &Portfolio,
        start: NaiveDate,
        as_of: NaiveDate,
    ) -> Result<Self> {
        let symbols = portfolio.symbols();
        if symbols.is_empty() {
            return Err(Error::EmptyPortfolio(portfolio.name().to_string()));
        }

        let mut closes: Vec<BTreeMap<NaiveDate, f64>> = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let quotes = feed.history(symbol, start, as_of)?;
            if quotes.is_empty() {
                return Err(Error::InsufficientHistory(format!(
                    "no observations for {} between {} and {}",
                    symbol, start, as_of
                )));
            }
            let mut series = BTreeMap::new();
            for quote in quotes {
                if !quote.close.is_finite() || quote.close <= 0.0 {
                    return Err(Error::InsufficientHistory(format!(
                        "non-positive close {} for {} on {}",
                        quote.close, symbol, quote.date
                    )));
                }
                series.insert(quote.date, quote.close);
            }
            log::debug!("{}: {} closes from {} to {}", symbol, series.len(), start, as_of);
            closes.push(series);
        }

        Self::from_closes(symbols, &closes)
    }

    /// Align per-symbol closes on their common dates and difference the logs.
    pub fn from_closes(symbols: Vec<String>, closes: &[BTreeMap<NaiveDate, f64>]) -> Result<Self> {
        let common: Vec<NaiveDate> = match closes.first() {
            Some(first) => first
                .keys()
                .filter(|date| closes.iter().all(|series| series.contains_key(date)))
                .copied()
                .collect(),
            None => Vec::new(),
        };

        if common.len() < 3 {
            return Err(Error::InsufficientHistory(format!(
                "{} aligned observations across {}; at least 3 are needed for two returns",
                common.len(),
                symbols.join(", ")
            )));
        }

        let rows = common.len() - 1;
        let returns = DMatrix::from_fn(rows, symbols.len(), |r, c| {
            let series = &closes[c];
            (series[&common[r + 1]] / series[&common[r]]).ln()
        });

        Ok(Self {
            symbols,
            dates: common[1..].to_vec(),
            returns,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Dates of the return rows (each is the later day of its pair)
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn returns(&self) -> &DMatrix<f64> {
        &self.returns
    }

    pub fn len(&self) -> usize {
        self.returns.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.nrows() == 0
    }

    /// Annualised mean vector and sample covariance (n − 1 denominator).
    pub fn statistics(&self) -> AssetStats {
        let n = self.returns.nrows() as f64;
        let mean = DVector::from_iterator(
            self.returns.ncols(),
            self.returns.column_iter().map(|col| col.sum() / n),
        );

        let mut centered = self.returns.clone();
        for (mut col, m) in centered.column_iter_mut().zip(mean.iter()) {
            col.add_scalar_mut(-m);
        }
        let cov = (centered.transpose() * &centered) / (n - 1.0);

        AssetStats {
            mean: mean * TRADING_DAYS,
            cov: cov * TRADING_DAYS,
        }
    }
}
