//! Application commands
//!
//! Thin entry points over the repository, the valuation engine and the
//! optimization pipeline. The CLI calls these; they hold no state of their own.

pub mod optimize;
pub mod portfolio;
