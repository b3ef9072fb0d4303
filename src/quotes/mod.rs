//! Quote Provider Framework
//!
//! Price sources behind a single [`PriceFeed`] trait:
//! - Yahoo Finance (close or adjusted close)
//! - Manual quotes (in-memory or JSON file)
//! - SQLite-backed history cache wrapping any other feed

pub mod cache;
pub mod manual;
pub mod yahoo;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::CachedFeed;
pub use manual::ManualFeed;
pub use yahoo::YahooFeed;

/// Single price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub date: NaiveDate,
    pub close: f64,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub volume: Option<i64>,
}

impl Quote {
    pub fn close_only(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            close,
            high: None,
            low: None,
            open: None,
            volume: None,
        }
    }
}

/// Current price with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQuote {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub quote: Quote,
}

/// Provider selection for the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Yahoo,
    YahooAdjusted,
    Manual,
}

impl ProviderType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "YAHOO" => Some(Self::Yahoo),
            "YAHOO-ADJUSTED" | "YAHOO-ADJUSTEDCLOSE" => Some(Self::YahooAdjusted),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::YahooAdjusted => "yahoo-adjusted",
            Self::Manual => "manual",
        }
    }
}

/// Failure of a feed lookup. Every variant names the symbol it concerns.
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("symbol {symbol} not found: {message}")]
    SymbolNotFound { symbol: String, message: String },

    #[error("request for {symbol} failed: {message}")]
    Request { symbol: String, message: String },

    #[error("unreadable response for {symbol}: {message}")]
    Parse { symbol: String, message: String },
}

impl QuoteError {
    pub fn symbol(&self) -> &str {
        match self {
            Self::SymbolNotFound { symbol, .. } | Self::Request { symbol, .. } | Self::Parse { symbol, .. } => {
                symbol
            }
        }
    }

    pub(crate) fn not_found(symbol: &str, message: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn request(symbol: &str, message: impl Into<String>) -> Self {
        Self::Request {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn parse(symbol: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }
}

/// Convert a price to its stored form (value × 10^8)
pub fn price_to_db(price: f64) -> i64 {
    (price * 100_000_000.0).round() as i64
}

/// Convert a stored price back
pub fn price_from_db(value: i64) -> f64 {
    value as f64 / 100_000_000.0
}

/// Source of current and historical prices.
///
/// `history` returns observations in ascending date order within
/// `[from, to]`, both inclusive.
pub trait PriceFeed {
    fn latest(&self, symbol: &str) -> Result<LatestQuote, QuoteError>;

    fn history(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Quote>, QuoteError>;
}

impl<F: PriceFeed + ?Sized> PriceFeed for &F {
    fn latest(&self, symbol: &str) -> Result<LatestQuote, QuoteError> {
        (**self).latest(symbol)
    }

    fn history(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Quote>, QuoteError> {
        (**self).history(symbol, from, to)
    }
}

impl<F: PriceFeed + ?Sized> PriceFeed for Box<F> {
    fn latest(&self, symbol: &str) -> Result<LatestQuote, QuoteError> {
        (**self).latest(symbol)
    }

    fn history(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Quote>, QuoteError> {
        (**self).history(symbol, from, to)
    }
}
