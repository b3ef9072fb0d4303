//! Error taxonomy for valuation, optimization and persistence.

use thiserror::Error;

use crate::quotes::QuoteError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The price feed has no usable data for a symbol.
    #[error("no price data for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// Too few observations to build a return series or fit a curve.
    #[error("insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("portfolio '{0}' holds no equities")]
    EmptyPortfolio(String),

    /// Every root-finder seed failed to converge.
    #[error("no tangency solution on the efficient frontier")]
    NoTangencySolution,

    #[error("a portfolio named '{0}' already exists")]
    NameCollision(String),

    #[error("portfolio '{0}' not found")]
    PortfolioNotFound(String),

    #[error("holding {0} not found")]
    HoldingNotFound(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<QuoteError> for Error {
    fn from(err: QuoteError) -> Self {
        Error::DataUnavailable {
            symbol: err.symbol().to_string(),
            reason: err.to_string(),
        }
    }
}
