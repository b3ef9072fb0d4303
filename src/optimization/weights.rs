//! Long-only minimum-volatility weights for a target return
//!
//! Weights are parametrised through softmax so the simplex (Σw = 1,
//! 0 ≤ w ≤ 1) holds exactly; the return target is a quadratic penalty whose
//! weight is raised in stages, each stage a Nelder–Mead run seeded from the
//! previous optimum.

use argmin::core::{CostFunction, Executor};
use argmin::solver::neldermead::NelderMead;
use serde::Serialize;

use super::AssetStats;

const PENALTY_STAGES: [f64; 3] = [1e2, 1e4, 1e6];
const MAX_ITERS: u64 = 4000;
const SD_TOLERANCE: f64 = 1e-12;
const SIMPLEX_STEP: f64 = 0.5;
/// Slack on the reachable return range before a target counts as infeasible
const FEASIBILITY_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightSolution {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub volatility: f64,
}

struct VolatilityCost {
    stats: AssetStats,
    target: f64,
    penalty: f64,
}

impl CostFunction for VolatilityCost {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let w = softmax(x);
        let vol = self.stats.portfolio_volatility(&w);
        let ret = self.stats.portfolio_return(&w);
        Ok(vol + self.penalty * (ret - self.target).powi(2))
    }
}

pub(crate) fn softmax(x: &[f64]) -> Vec<f64> {
    if x.is_empty() {
        return Vec::new();
    }

    let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
    let sum: f64 = exps.iter().sum();

    if sum < 1e-15 {
        vec![1.0 / x.len() as f64; x.len()]
    } else {
        exps.iter().map(|&e| e / sum).collect()
    }
}

fn simplex_around(x0: &[f64], step: f64) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for i in 0..x0.len() {
        let mut point = x0.to_vec();
        point[i] += step;
        simplex.push(point);
    }
    simplex
}

fn run_stage(stats: &AssetStats, target: f64, penalty: f64, x0: Vec<f64>) -> Result<Vec<f64>, argmin::core::Error> {
    let cost = VolatilityCost {
        stats: stats.clone(),
        target,
        penalty,
    };
    let solver = NelderMead::new(simplex_around(&x0, SIMPLEX_STEP)).with_sd_tolerance(SD_TOLERANCE)?;
    let res = Executor::new(cost, solver)
        .configure(|state| state.max_iters(MAX_ITERS))
        .run()?;
    Ok(res.state.best_param.unwrap_or(x0))
}

fn one_hot(n: usize, idx: usize) -> Vec<f64> {
    let mut w = vec![0.0; n];
    w[idx] = 1.0;
    w
}

fn solution(stats: &AssetStats, weights: Vec<f64>) -> WeightSolution {
    WeightSolution {
        expected_return: stats.portfolio_return(&weights),
        volatility: stats.portfolio_volatility(&weights),
        weights,
    }
}

/// Minimise portfolio volatility subject to Σw = 1, 0 ≤ w ≤ 1 and an
/// expected return of `target`.
///
/// A target outside the reachable return range resolves to the
/// single-asset extreme nearest to it.
pub fn minimize_volatility(stats: &AssetStats, target: f64) -> WeightSolution {
    let n = stats.len();
    if n == 0 {
        return solution(stats, Vec::new());
    }
    if n == 1 {
        return solution(stats, vec![1.0]);
    }

    let (lo_idx, hi_idx) = return_extremes(stats);
    if target > stats.mean[hi_idx] + FEASIBILITY_SLACK {
        return solution(stats, one_hot(n, hi_idx));
    }
    if target < stats.mean[lo_idx] - FEASIBILITY_SLACK {
        return solution(stats, one_hot(n, lo_idx));
    }

    // softmax(0) is the equal-weight portfolio
    let mut x = vec![0.0; n];
    for penalty in PENALTY_STAGES {
        match run_stage(stats, target, penalty, x.clone()) {
            Ok(best) => x = best,
            Err(e) => {
                log::warn!("Nelder-Mead failed at penalty {} for target {}: {}", penalty, target, e);
                break;
            }
        }
    }

    let result = solution(stats, softmax(&x));
    log::trace!(
        "target {:.6}: return {:.6}, volatility {:.6}",
        target,
        result.expected_return,
        result.volatility
    );
    result
}

/// Lowest and highest expected return any long-only portfolio can reach
pub(crate) fn reachable_returns(stats: &AssetStats) -> Option<(f64, f64)> {
    if stats.len() == 0 {
        return None;
    }
    let (lo, hi) = return_extremes(stats);
    Some((stats.mean[lo], stats.mean[hi]))
}

/// Indices of the lowest and highest expected return (first occurrence)
fn return_extremes(stats: &AssetStats) -> (usize, usize) {
    let mut lo = 0;
    let mut hi = 0;
    for (i, m) in stats.mean.iter().enumerate() {
        if *m < stats.mean[lo] {
            lo = i;
        }
        if *m > stats.mean[hi] {
            hi = i;
        }
    }
    (lo, hi)
}

/// Round each weight to 4 decimals (half away from zero) and drop the sign.
pub fn round_weights(weights: &[f64]) -> Vec<f64> {
    weights.iter().map(|w| ((w * 1e4).round() / 1e4).abs()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::test_support;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_softmax_is_on_simplex() {
        let w = softmax(&[0.0, 1.0, -3.0, 700.0]);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(softmax(&[0.0, 0.0]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_equal_variance_uncorrelated_pair_splits_evenly() {
        let stats = test_support::symmetric_pair(0.04);
        let sol = minimize_volatility(&stats, 0.0);
        assert!((sol.weights[0] - 0.5).abs() < 1e-3, "{:?}", sol.weights);
        assert!((sol.weights[1] - 0.5).abs() < 1e-3, "{:?}", sol.weights);
        assert!((sol.volatility - 0.02f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_two_asset_target_fixes_weights() {
        let stats = AssetStats {
            mean: DVector::from_vec(vec![0.1, 0.2]),
            cov: DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.09]),
        };
        let sol = minimize_volatility(&stats, 0.15);
        assert!((sol.weights[0] - 0.5).abs() < 1e-3, "{:?}", sol.weights);
        assert!((sol.expected_return - 0.15).abs() < 1e-4);
    }

    #[test]
    fn test_weights_sum_to_one_within_bounds() {
        let stats = test_support::three_assets();
        for target in [0.07, 0.1, 0.15, 0.19] {
            let sol = minimize_volatility(&stats, target);
            let sum: f64 = sol.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-3);
            assert!(sol.weights.iter().all(|w| (0.0..=1.0).contains(w)));
            assert!((sol.expected_return - target).abs() < 1e-3, "target {} got {}", target, sol.expected_return);
        }
    }

    #[test]
    fn test_infeasible_targets_take_single_asset_extremes() {
        let stats = test_support::three_assets();
        let high = minimize_volatility(&stats, 0.5);
        assert_eq!(high.weights, vec![0.0, 0.0, 1.0]);
        assert!((high.volatility - 0.3).abs() < 1e-12);

        let low = minimize_volatility(&stats, 0.0);
        assert_eq!(low.weights, vec![1.0, 0.0, 0.0]);
        assert!((low.volatility - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_round_weights() {
        assert_eq!(round_weights(&[0.123456, -0.00004, 0.87654]), vec![0.1235, 0.0, 0.8765]);
        assert_eq!(round_weights(&[1.0, 0.0]), vec![1.0, 0.0]);
    }
}
