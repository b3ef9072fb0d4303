//! Tangency (maximum Sharpe) portfolio
//!
//! Solves for the line through the risk-free point that touches the fitted
//! frontier:
//!
//! ```text
//! a          = rf
//! a + b·x    = f(x)
//! b          = f'(x)
//! ```
//!
//! for intercept `a`, slope `b` and volatility `x`, with Levenberg–Marquardt
//! started from a fixed list of guesses.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, Owned};
use serde::Serialize;

use super::frontier::{Frontier, SimulatedCloud};
use super::spline::FrontierSpline;
use super::weights::{minimize_volatility, round_weights};
use super::OptimizationContext;
use crate::error::{Error, Result};

/// Multipliers applied to the mean simulated return for the slope guess,
/// tried in this order
const SLOPE_GUESS_MULTIPLIERS: [f64; 5] = [2.0, 4.0, 1.0, 5.0, 3.0];
const RESIDUAL_TOLERANCE: f64 = 1e-8;
const DOMAIN_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TangencyPoint {
    pub volatility: f64,
    pub expected_return: f64,
    /// Slope of the capital market line
    pub slope: f64,
    /// Risk-free rate, the line's intercept
    pub intercept: f64,
    pub sharpe_ratio: f64,
}

impl TangencyPoint {
    /// Return on the capital market line at volatility `vol`
    pub fn capital_market_line(&self, vol: f64) -> f64 {
        self.intercept + self.slope * vol
    }
}

struct TangencyProblem<'a> {
    spline: &'a FrontierSpline,
    rf: f64,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for TangencyProblem<'_> {
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let (a, b, x) = (self.params[0], self.params[1], self.params[2]);
        Some(DVector::from_vec(vec![
            self.rf - a,
            a + b * x - self.spline.value(x),
            b - self.spline.derivative(x),
        ]))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let (b, x) = (self.params[1], self.params[2]);
        let jacobian = DMatrix::from_row_slice(
            3,
            3,
            &[
                -1.0, 0.0, 0.0, //
                1.0, x, b - self.spline.derivative(x), //
                0.0, 1.0, -self.spline.second_derivative(x),
            ],
        );
        Some(jacobian)
    }
}

/// Find the tangency point on `spline` for risk-free rate `rf`.
///
/// `mean_return` and `mean_volatility` seed the search (typically the means of
/// the simulated cloud). A root is accepted only inside the fitted volatility
/// range, where portfolios exist. Fails with [`Error::NoTangencySolution`]
/// when no guess converges there.
pub fn solve(spline: &FrontierSpline, rf: f64, mean_return: f64, mean_volatility: f64) -> Result<TangencyPoint> {
    let (lo, hi) = spline.domain();
    let slack = DOMAIN_SLACK * hi.abs().max(1.0);
    for multiplier in SLOPE_GUESS_MULTIPLIERS {
        let guess = DVector::from_vec(vec![rf, mean_return * multiplier, mean_volatility]);
        let problem = TangencyProblem {
            spline,
            rf,
            params: guess,
        };

        let (solved, report) = LevenbergMarquardt::new().minimize(problem);
        let residual_norm = solved.residuals().map(|r| r.norm()).unwrap_or(f64::INFINITY);
        let (b, x) = (solved.params[1], solved.params[2]);

        if report.termination.was_successful()
            && residual_norm < RESIDUAL_TOLERANCE
            && x.is_finite()
            && x > 0.0
            && x >= lo - slack
            && x <= hi + slack
        {
            let expected_return = spline.value(x);
            log::debug!(
                "Tangency at volatility {:.6}, return {:.6} (guess multiplier {}, {} evaluations)",
                x,
                expected_return,
                multiplier,
                report.number_of_evaluations
            );
            return Ok(TangencyPoint {
                volatility: x,
                expected_return,
                slope: b,
                intercept: rf,
                sharpe_ratio: (expected_return - rf) / x,
            });
        }

        log::debug!(
            "Tangency guess x{} rejected: {:?}, residual {:e}, volatility {}",
            multiplier,
            report.termination,
            residual_norm,
            x
        );
    }

    Err(Error::NoTangencySolution)
}

/// Fit the cleaned frontier and solve for the tangency point, seeded from
/// the simulated cloud.
pub fn find_tangency(frontier: &Frontier, cloud: &SimulatedCloud, rf: f64) -> Result<TangencyPoint> {
    let spline = FrontierSpline::fit(&frontier.volatilities(), &frontier.returns())?;
    solve(&spline, rf, cloud.mean_return(), cloud.mean_volatility())
}

/// Minimum-volatility weights for `target`, rounded to 4 decimals.
pub fn optimal_weights(ctx: &OptimizationContext, target: f64) -> Vec<f64> {
    let solution = minimize_volatility(ctx.stats(), target);
    round_weights(&solution.weights)
}
