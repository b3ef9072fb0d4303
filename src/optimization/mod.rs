//! Portfolio Optimization Module
//!
//! Implements Modern Portfolio Theory (Markowitz):
//! - Annualised return statistics from daily log returns
//! - Monte Carlo risk/return cloud
//! - Efficient frontier by constrained volatility minimisation
//! - Tangency (maximum Sharpe) portfolio under a risk-free rate

pub mod frontier;
pub mod returns;
pub mod spline;
pub mod tangency;
pub mod weights;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

/// Trading days used to annualise daily statistics
pub const TRADING_DAYS: f64 = 252.0;

// ============================================================================
// Data Types
// ============================================================================

/// Annualised expected returns and covariance of a set of assets
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStats {
    pub mean: DVector<f64>,
    pub cov: DMatrix<f64>,
}

impl AssetStats {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Expected return `Σ mean·w`
    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        self.mean.iter().zip(weights).map(|(m, w)| m * w).sum()
    }

    /// Volatility `sqrt(wᵀ Σ w)`
    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        let w = DVector::from_column_slice(weights);
        let variance = w.dot(&(&self.cov * &w));
        variance.max(0.0).sqrt()
    }
}

/// A (volatility, expected return) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierPoint {
    pub volatility: f64,
    pub expected_return: f64,
}

/// Everything one optimisation run works on: the asset universe, its
/// statistics, the risk-free rate and the sampling generator.
pub struct OptimizationContext {
    symbols: Vec<String>,
    stats: AssetStats,
    risk_free_rate: f64,
    rng: StdRng,
}

impl OptimizationContext {
    /// A fixed `seed` makes the simulated cloud reproducible.
    pub fn new(symbols: Vec<String>, stats: AssetStats, risk_free_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            symbols,
            stats,
            risk_free_rate,
            rng,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn stats(&self) -> &AssetStats {
        &self.stats
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Two uncorrelated assets with equal variance and zero mean
    pub fn symmetric_pair(variance: f64) -> AssetStats {
        AssetStats {
            mean: DVector::from_vec(vec![0.0, 0.0]),
            cov: DMatrix::from_row_slice(2, 2, &[variance, 0.0, 0.0, variance]),
        }
    }

    /// Three assets with distinct returns and a mild correlation
    pub fn three_assets() -> AssetStats {
        AssetStats {
            mean: DVector::from_vec(vec![0.06, 0.12, 0.20]),
            cov: DMatrix::from_row_slice(
                3,
                3,
                &[
                    0.0100, 0.0020, 0.0010, //
                    0.0020, 0.0400, 0.0060, //
                    0.0010, 0.0060, 0.0900,
                ],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portfolio_moments() {
        let stats = test_support::three_assets();
        let w = [0.5, 0.3, 0.2];
        assert!((stats.portfolio_return(&w) - (0.03 + 0.036 + 0.04)).abs() < 1e-12);

        let var: f64 = 0.25 * 0.01 + 0.09 * 0.04 + 0.04 * 0.09
            + 2.0 * (0.5 * 0.3 * 0.002 + 0.5 * 0.2 * 0.001 + 0.3 * 0.2 * 0.006);
        assert!((stats.portfolio_volatility(&w) - var.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_seeded_context_is_reproducible() {
        use rand::Rng;
        let mut a = OptimizationContext::new(vec![], test_support::three_assets(), 0.01, Some(3));
        let mut b = OptimizationContext::new(vec![], test_support::three_assets(), 0.01, Some(3));
        let xa: f64 = a.rng_mut().gen();
        let xb: f64 = b.rng_mut().gen();
        assert_eq!(xa, xb);
    }
}
