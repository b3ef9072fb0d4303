//! Risk/return cloud and efficient frontier

use rand::Rng;
use serde::Serialize;

use super::weights::{minimize_volatility, reachable_returns};
use super::{FrontierPoint, OptimizationContext};
use crate::error::{Error, Result};

/// One randomly weighted portfolio
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedPortfolio {
    pub volatility: f64,
    pub expected_return: f64,
    pub sharpe_ratio: f64,
}

/// Monte Carlo sample of the feasible risk/return region
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedCloud {
    pub portfolios: Vec<SimulatedPortfolio>,
}

impl SimulatedCloud {
    pub fn len(&self) -> usize {
        self.portfolios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty()
    }

    pub fn mean_return(&self) -> f64 {
        mean(self.portfolios.iter().map(|p| p.expected_return))
    }

    pub fn mean_volatility(&self) -> f64 {
        mean(self.portfolios.iter().map(|p| p.volatility))
    }
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Volatility per target return, before cleaning
///
/// `returns` holds the return each point actually reaches: the target itself,
/// or the nearest asset mean for targets outside the reachable range.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFrontier {
    pub targets: Vec<f64>,
    pub returns: Vec<f64>,
    pub volatilities: Vec<f64>,
}

impl RawFrontier {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Upper branch of the frontier, strictly increasing in volatility
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontier {
    pub points: Vec<FrontierPoint>,
}

impl Frontier {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.volatility).collect()
    }

    pub fn returns(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.expected_return).collect()
    }

    /// The minimum-volatility point, which cleaning puts first
    pub fn min_volatility_point(&self) -> Option<FrontierPoint> {
        self.points.first().copied()
    }
}

/// Sample `samples` random long-only portfolios.
pub fn simulate(ctx: &mut OptimizationContext, samples: usize) -> SimulatedCloud {
    let n = ctx.stats().len();
    let rf = ctx.risk_free_rate();
    let mut portfolios = Vec::with_capacity(samples);

    for _ in 0..samples {
        let mut weights: Vec<f64> = {
            let rng = ctx.rng_mut();
            (0..n).map(|_| rng.gen::<f64>()).collect()
        };
        let sum: f64 = weights.iter().sum();
        if sum > 0.0 {
            for w in &mut weights {
                *w /= sum;
            }
        } else {
            weights = vec![1.0 / n as f64; n];
        }

        let stats = ctx.stats();
        let expected_return = stats.portfolio_return(&weights);
        let volatility = stats.portfolio_volatility(&weights);
        let sharpe_ratio = if volatility > 0.0 {
            (expected_return - rf) / volatility
        } else {
            0.0
        };

        portfolios.push(SimulatedPortfolio {
            volatility,
            expected_return,
            sharpe_ratio,
        });
    }

    log::debug!("Simulated {} portfolios over {} assets", portfolios.len(), n);
    SimulatedCloud { portfolios }
}

/// `num` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Minimum volatility for each of `num_points` target returns spread over
/// `range`.
pub fn efficient_frontier(ctx: &OptimizationContext, num_points: usize, range: (f64, f64)) -> Result<RawFrontier> {
    if num_points == 0 {
        return Err(Error::InvalidInput("frontier needs at least one point".to_string()));
    }
    if !(range.0 <= range.1) {
        return Err(Error::InvalidInput(format!(
            "target return range [{}, {}] is empty",
            range.0, range.1
        )));
    }

    let targets = linspace(range.0, range.1, num_points);
    let volatilities: Vec<f64> = targets
        .iter()
        .map(|&target| minimize_volatility(ctx.stats(), target).volatility)
        .collect();
    let returns: Vec<f64> = match reachable_returns(ctx.stats()) {
        Some((lo, hi)) => targets.iter().map(|t| t.max(lo).min(hi)).collect(),
        None => targets.clone(),
    };

    log::debug!(
        "Solved {} frontier targets in [{}, {}]",
        targets.len(),
        range.0,
        range.1
    );
    Ok(RawFrontier {
        targets,
        returns,
        volatilities,
    })
}

fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}

/// Keep the branch above the minimum-volatility point.
///
/// Starts at the first minimum volatility, rounds both axes to 8 decimals and
/// stops at the first point whose volatility does not increase, keeping the
/// earlier point of the pair. Everything after that point is dropped.
pub fn clean(raw: &RawFrontier) -> Frontier {
    let mut min_idx = 0;
    for (i, v) in raw.volatilities.iter().enumerate() {
        if *v < raw.volatilities[min_idx] {
            min_idx = i;
        }
    }

    let mut points: Vec<FrontierPoint> = Vec::new();
    for (ret, vol) in raw.returns.iter().zip(raw.volatilities.iter()).skip(min_idx) {
        let point = FrontierPoint {
            volatility: round8(*vol),
            expected_return: round8(*ret),
        };
        if let Some(last) = points.last() {
            if point.volatility <= last.volatility {
                break;
            }
        }
        points.push(point);
    }

    if points.len() < raw.len().saturating_sub(min_idx) {
        log::debug!(
            "Frontier truncated to {} of {} points after the minimum",
            points.len(),
            raw.len() - min_idx
        );
    }
    Frontier { points }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::test_support;

    #[test]
    fn test_linspace_inclusive() {
        let xs = linspace(0.0, 0.5, 100);
        assert_eq!(xs.len(), 100);
        assert_eq!(xs[0], 0.0);
        assert_eq!(xs[99], 0.5);
        assert!((xs[1] - 0.5 / 99.0).abs() < 1e-15);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
    }

    #[test]
    fn test_simulate_stays_inside_asset_bounds() {
        let mut ctx = OptimizationContext::new(vec![], test_support::three_assets(), 0.01, Some(11));
        let cloud = simulate(&mut ctx, 500);
        assert_eq!(cloud.len(), 500);
        for p in &cloud.portfolios {
            assert!(p.expected_return >= 0.06 - 1e-12 && p.expected_return <= 0.20 + 1e-12);
            assert!(p.volatility > 0.0 && p.volatility <= 0.3 + 1e-12);
            assert!((p.sharpe_ratio - (p.expected_return - 0.01) / p.volatility).abs() < 1e-12);
        }
        assert!(cloud.mean_return() > 0.06 && cloud.mean_return() < 0.20);
    }

    #[test]
    fn test_simulate_is_reproducible_with_seed() {
        let mut a = OptimizationContext::new(vec![], test_support::three_assets(), 0.01, Some(5));
        let mut b = OptimizationContext::new(vec![], test_support::three_assets(), 0.01, Some(5));
        assert_eq!(simulate(&mut a, 20).portfolios, simulate(&mut b, 20).portfolios);
    }

    #[test]
    fn test_efficient_frontier_returns_requested_points() {
        let ctx = OptimizationContext::new(vec![], test_support::three_assets(), 0.01, Some(1));
        let raw = efficient_frontier(&ctx, 100, (0.0, 0.5)).unwrap();
        assert_eq!(raw.len(), 100);
        assert_eq!(raw.volatilities.len(), 100);
        assert!(raw.volatilities.iter().all(|v| *v >= 0.0));
        assert_eq!(raw.targets[0], 0.0);
        assert_eq!(raw.targets[99], 0.5);
        // Unreachable targets are labelled with the asset mean they resolve to
        assert_eq!(raw.returns[0], 0.06);
        assert_eq!(raw.returns[99], 0.20);
        assert!(raw.returns.iter().all(|r| (0.06..=0.20).contains(r)));
    }

    #[test]
    fn test_clean_output_strictly_increasing() {
        let ctx = OptimizationContext::new(vec![], test_support::three_assets(), 0.01, Some(1));
        let raw = efficient_frontier(&ctx, 60, (0.0, 0.5)).unwrap();
        let frontier = clean(&raw);

        assert!(frontier.len() >= 2);
        for pair in frontier.points.windows(2) {
            assert!(pair[1].volatility > pair[0].volatility);
        }
        let min_raw = raw.volatilities.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!((frontier.points[0].volatility - min_raw).abs() < 1e-8);
        // The plateau at the riskiest asset is cut after its first point
        let last = frontier.points.last().unwrap();
        assert!((last.volatility - 0.3).abs() < 1e-8);
        assert!((last.expected_return - 0.20).abs() < 1e-12);
        assert!(frontier.returns().iter().all(|r| *r <= 0.20 + 1e-12));
    }

    #[test]
    fn test_clean_truncates_at_first_tie() {
        let raw = RawFrontier {
            targets: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5],
            returns: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5],
            volatilities: vec![0.3, 0.1, 0.2, 0.2, 0.25, 0.3],
        };
        let frontier = clean(&raw);
        assert_eq!(frontier.volatilities(), vec![0.1, 0.2]);
        assert_eq!(frontier.returns(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_clean_rounds_to_eight_places() {
        let raw = RawFrontier {
            targets: vec![0.1, 0.2, 0.3],
            returns: vec![0.1, 0.2, 0.3],
            volatilities: vec![0.1, 0.2000000001, 0.2000000004],
        };
        let frontier = clean(&raw);
        assert_eq!(frontier.len(), 2);
        assert_eq!(frontier.points[1].volatility, 0.2);
    }

    #[test]
    fn test_clean_empty() {
        assert!(clean(&RawFrontier::default()).is_empty());
    }
}
