//! Portfolio optimization command
//!
//! Runs the full pipeline for one portfolio: refresh, return statistics,
//! Monte Carlo cloud, efficient frontier, tangency portfolio and finally the
//! rebalanced `<name>_opt` copy. Nothing but the source refresh is written
//! until the target weights are known.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::db::Repository;
use crate::error::{Error, Result};
use crate::models::Portfolio;
use crate::optimization::frontier::{self, Frontier, RawFrontier, SimulatedCloud};
use crate::optimization::returns::ReturnSeries;
use crate::optimization::tangency::{self, TangencyPoint};
use crate::optimization::{FrontierPoint, OptimizationContext};
use crate::quotes::PriceFeed;
use crate::rebalancing::{self, RebalanceAction};
use crate::valuation::ValuationEngine;

/// Settings for one optimization run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeParams {
    pub risk_free_rate: f64,
    /// Calendar days of history ending at the valuation date
    pub history_days: i64,
    pub samples: usize,
    pub frontier_points: usize,
    pub target_range: (f64, f64),
    pub seed: Option<u64>,
}

impl Default for OptimizeParams {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.01,
            history_days: 365,
            samples: 500,
            frontier_points: 100,
            target_range: (0.0, 0.5),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetWeight {
    pub symbol: String,
    pub weight: f64,
}

/// Everything a chart layer needs: cloud, frontier, capital market line and
/// the chosen point, plus the resulting portfolio.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub source: String,
    pub as_of: NaiveDate,
    pub window_start: NaiveDate,
    pub observations: usize,
    pub risk_free_rate: f64,
    pub cloud: SimulatedCloud,
    pub raw_frontier: RawFrontier,
    pub frontier: Frontier,
    pub tangency: Option<TangencyPoint>,
    /// The minimum-volatility point was used because no tangency was found
    pub used_fallback: bool,
    pub chosen: FrontierPoint,
    pub weights: Vec<AssetWeight>,
    pub actions: Vec<RebalanceAction>,
    pub optimized: Portfolio,
}

/// Optimize the portfolio called `name` as of `as_of` and store the result
/// as `<name>_opt`.
pub fn optimize_portfolio(
    feed: &dyn PriceFeed,
    repo: &dyn Repository,
    name: &str,
    params: &OptimizeParams,
    as_of: NaiveDate,
) -> Result<OptimizationReport> {
    if params.history_days <= 0 {
        return Err(Error::InvalidInput(format!(
            "history window must be positive, got {} days",
            params.history_days
        )));
    }

    let engine = ValuationEngine::new(feed);
    let mut source = repo.get_portfolio(name)?;
    engine.refresh(repo, &mut source, as_of)?;

    let window_start = as_of - Duration::days(params.history_days);
    let series = ReturnSeries::build(feed, &source, window_start, as_of)?;
    log::info!(
        "Optimizing '{}' over {} symbols and {} daily returns",
        source.name(),
        series.symbols().len(),
        series.len()
    );

    let mut ctx = OptimizationContext::new(
        series.symbols().to_vec(),
        series.statistics(),
        params.risk_free_rate,
        params.seed,
    );
    let cloud = frontier::simulate(&mut ctx, params.samples);
    let raw_frontier = frontier::efficient_frontier(&ctx, params.frontier_points, params.target_range)?;
    let cleaned = frontier::clean(&raw_frontier);

    let tangency = if cleaned.len() >= 2 {
        match tangency::find_tangency(&cleaned, &cloud, ctx.risk_free_rate()) {
            Ok(point) => Some(point),
            Err(Error::NoTangencySolution) => None,
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    let (chosen, used_fallback) = match tangency {
        Some(point) => (
            FrontierPoint {
                volatility: point.volatility,
                expected_return: point.expected_return,
            },
            false,
        ),
        None => {
            let point = cleaned.min_volatility_point().ok_or_else(|| {
                Error::InsufficientHistory(format!("no frontier points for '{}'", source.name()))
            })?;
            log::warn!(
                "No tangency portfolio for '{}' ({} frontier points), using minimum volatility {:.6} at return {:.6}",
                source.name(),
                cleaned.len(),
                point.volatility,
                point.expected_return
            );
            (point, true)
        }
    };

    let weights = tangency::optimal_weights(&ctx, chosen.expected_return);

    let mut optimized = rebalancing::materialize_optimal(repo, &source)?;
    let total_balance = source.market_value() - source.cash();
    let actions = rebalancing::rebalance(
        &engine,
        repo,
        &mut optimized,
        ctx.symbols(),
        &weights,
        total_balance,
        source.market_value(),
        as_of,
    )?;

    let weights = ctx
        .symbols()
        .iter()
        .zip(weights)
        .map(|(symbol, weight)| AssetWeight {
            symbol: symbol.clone(),
            weight,
        })
        .collect();

    Ok(OptimizationReport {
        source: source.name().to_string(),
        as_of,
        window_start,
        observations: series.len(),
        risk_free_rate: ctx.risk_free_rate(),
        cloud,
        raw_frontier,
        frontier: cleaned,
        tangency,
        used_fallback,
        chosen,
        weights,
        actions,
        optimized,
    })
}
