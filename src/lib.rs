//! Portfolio tracking with mean-variance optimization
//!
//! Portfolios of equity holdings are valued against a [`quotes::PriceFeed`]
//! and stored in SQLite. The optimization pipeline estimates annualised
//! return statistics, traces the efficient frontier, finds the tangency
//! portfolio for a risk-free rate and writes a rebalanced `<name>_opt` copy.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod optimization;
pub mod quotes;
pub mod rebalancing;
pub mod valuation;

pub use error::{Error, Result};
