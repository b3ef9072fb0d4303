//! Portfolio lifecycle commands
//!
//! Every command that changes holdings or cash ends in a refresh, so the
//! stored metrics are consistent whenever a command returns `Ok`.

use chrono::NaiveDate;

use crate::db::{PortfolioOrder, Repository};
use crate::error::{Error, Result};
use crate::models::{Holding, HoldingEdit, NewHolding, Portfolio};
use crate::valuation::ValuationEngine;

pub fn create_portfolio(repo: &dyn Repository, name: &str, cash: f64) -> Result<Portfolio> {
    let portfolio = repo.create_portfolio(name, cash)?;
    log::info!("Created portfolio '{}' with cash {:.2}", portfolio.name(), cash);
    Ok(portfolio)
}

pub fn get_portfolios(repo: &dyn Repository, order: PortfolioOrder) -> Result<Vec<Portfolio>> {
    repo.list_portfolios(order)
}

pub fn get_portfolio(repo: &dyn Repository, name: &str) -> Result<Portfolio> {
    repo.get_portfolio(name)
}

/// Add a holding and value it right away. If the price lookup fails the
/// holding is not stored.
pub fn add_holding(
    engine: &ValuationEngine<'_>,
    repo: &dyn Repository,
    name: &str,
    new: &NewHolding,
    as_of: NaiveDate,
) -> Result<Portfolio> {
    let mut portfolio = repo.get_portfolio(name)?;
    let holding = Holding::new(portfolio.id(), new)?;
    log::info!("Adding {} x {} to '{}'", holding.shares(), holding.symbol(), portfolio.name());
    portfolio.holdings.push(holding);

    engine.refresh(repo, &mut portfolio, as_of)?;
    Ok(portfolio)
}

pub fn edit_holding(
    engine: &ValuationEngine<'_>,
    repo: &dyn Repository,
    name: &str,
    holding_id: i64,
    edit: &HoldingEdit,
    as_of: NaiveDate,
) -> Result<Portfolio> {
    let mut portfolio = repo.get_portfolio(name)?;
    let holding = portfolio
        .holdings
        .iter_mut()
        .find(|h| h.id() == Some(holding_id))
        .ok_or(Error::HoldingNotFound(holding_id))?;
    holding.apply(edit)?;

    engine.refresh(repo, &mut portfolio, as_of)?;
    Ok(portfolio)
}

/// Sell a holding completely. It is dropped by the refresh.
pub fn remove_holding(
    engine: &ValuationEngine<'_>,
    repo: &dyn Repository,
    name: &str,
    holding_id: i64,
    as_of: NaiveDate,
) -> Result<Portfolio> {
    let edit = HoldingEdit {
        shares: Some(0),
        ..Default::default()
    };
    edit_holding(engine, repo, name, holding_id, &edit, as_of)
}

pub fn set_cash(
    engine: &ValuationEngine<'_>,
    repo: &dyn Repository,
    name: &str,
    cash: f64,
    as_of: NaiveDate,
) -> Result<Portfolio> {
    let mut portfolio = repo.get_portfolio(name)?;
    portfolio.set_cash(cash)?;
    engine.refresh(repo, &mut portfolio, as_of)?;
    Ok(portfolio)
}

pub fn refresh_portfolio(
    engine: &ValuationEngine<'_>,
    repo: &dyn Repository,
    name: &str,
    as_of: NaiveDate,
) -> Result<Portfolio> {
    let mut portfolio = repo.get_portfolio(name)?;
    engine.refresh(repo, &mut portfolio, as_of)?;
    Ok(portfolio)
}

/// Refresh every portfolio in name order, stopping at the first failure.
/// Portfolios refreshed before the failure stay saved.
pub fn refresh_all(engine: &ValuationEngine<'_>, repo: &dyn Repository, as_of: NaiveDate) -> Result<Vec<Portfolio>> {
    let mut portfolios = repo.list_portfolios(PortfolioOrder::Name)?;
    for portfolio in portfolios.iter_mut() {
        engine.refresh(repo, portfolio, as_of)?;
    }
    Ok(portfolios)
}

pub fn delete_portfolio(repo: &dyn Repository, name: &str) -> Result<()> {
    repo.delete_portfolio(name)?;
    log::info!("Deleted portfolio '{}'", name);
    Ok(())
}
