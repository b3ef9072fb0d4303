//! Manual quotes
//!
//! Prices entered by hand or loaded from a JSON file of the form
//! `{ "AAPL": [{ "date": "2024-01-02", "close": 185.64 }, ...] }`.
//! Used for offline runs and as the test fixture feed.

use super::{LatestQuote, PriceFeed, Quote, QuoteError};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default)]
pub struct ManualFeed {
    series: HashMap<String, Vec<Quote>>,
    latest_calls: Cell<usize>,
    history_calls: Cell<usize>,
}

impl ManualFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a quote file. Symbols are upper-cased; series are sorted by date.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading quote file {}", path.display()))?;
        let parsed: HashMap<String, Vec<Quote>> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing quote file {}", path.display()))?;

        let mut feed = Self::new();
        for (symbol, quotes) in parsed {
            feed.insert(&symbol, quotes);
        }
        log::info!("Loaded manual quotes for {} symbols from {}", feed.series.len(), path.display());
        Ok(feed)
    }

    /// Replace the series for a symbol.
    pub fn insert(&mut self, symbol: &str, mut quotes: Vec<Quote>) {
        quotes.sort_by_key(|q| q.date);
        quotes.dedup_by_key(|q| q.date);
        self.series.insert(symbol.trim().to_uppercase(), quotes);
    }

    /// Builder form of [`insert`](Self::insert) taking `(date, close)` pairs.
    pub fn with_closes(mut self, symbol: &str, closes: &[(NaiveDate, f64)]) -> Self {
        let quotes = closes
            .iter()
            .map(|(date, close)| Quote::close_only(*date, *close))
            .collect();
        self.insert(symbol, quotes);
        self
    }

    /// Number of `latest` lookups served so far.
    pub fn latest_calls(&self) -> usize {
        self.latest_calls.get()
    }

    /// Number of `history` lookups served so far.
    pub fn history_calls(&self) -> usize {
        self.history_calls.get()
    }

    fn series(&self, symbol: &str) -> Result<&[Quote], QuoteError> {
        self.series
            .get(symbol)
            .map(|v| v.as_slice())
            .ok_or_else(|| QuoteError::not_found(symbol, "no manual quotes"))
    }
}

impl PriceFeed for ManualFeed {
    fn latest(&self, symbol: &str) -> Result<LatestQuote, QuoteError> {
        self.latest_calls.set(self.latest_calls.get() + 1);
        let quote = self
            .series(symbol)?
            .last()
            .cloned()
            .ok_or_else(|| QuoteError::not_found(symbol, "empty manual series"))?;
        Ok(LatestQuote {
            symbol: symbol.to_string(),
            name: None,
            currency: None,
            quote,
        })
    }

    fn history(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Quote>, QuoteError> {
        self.history_calls.set(self.history_calls.get() + 1);
        Ok(self
            .series(symbol)?
            .iter()
            .filter(|q| q.date >= from && q.date <= to)
            .cloned()
            .collect())
    }
}
