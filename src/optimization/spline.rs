//! Interpolating natural cubic spline through the cleaned frontier

use crate::error::{Error, Result};

/// Return as a smooth function of volatility.
///
/// With two knots the natural spline is the straight line through them.
/// Outside the knot range the end segments are extended.
#[derive(Debug, Clone)]
pub struct FrontierSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivatives at the knots
    m: Vec<f64>,
}

impl FrontierSpline {
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(Error::InvalidInput(format!(
                "spline needs matching axes, got {} and {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(Error::InsufficientHistory(format!(
                "{} frontier point(s); a curve needs at least 2",
                xs.len()
            )));
        }
        if xs.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::InvalidInput("spline knots must be strictly increasing".to_string()));
        }

        let m = natural_second_derivatives(xs, ys);
        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        })
    }

    pub fn knots(&self) -> usize {
        self.xs.len()
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Segment index and the local coordinates (h, A, B) for `x`
    fn locate(&self, x: f64) -> (usize, f64, f64, f64) {
        let last = self.xs.len() - 2;
        let i = self.xs.partition_point(|k| *k <= x).saturating_sub(1).min(last);
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        (i, h, a, b)
    }

    pub fn value(&self, x: f64) -> f64 {
        let (i, h, a, b) = self.locate(x);
        a * self.ys[i]
            + b * self.ys[i + 1]
            + ((a.powi(3) - a) * self.m[i] + (b.powi(3) - b) * self.m[i + 1]) * h * h / 6.0
    }

    pub fn derivative(&self, x: f64) -> f64 {
        let (i, h, a, b) = self.locate(x);
        (self.ys[i + 1] - self.ys[i]) / h - (3.0 * a * a - 1.0) / 6.0 * h * self.m[i]
            + (3.0 * b * b - 1.0) / 6.0 * h * self.m[i + 1]
    }

    pub fn second_derivative(&self, x: f64) -> f64 {
        let (i, _, a, b) = self.locate(x);
        a * self.m[i] + b * self.m[i + 1]
    }
}

/// Solve the tridiagonal system for the knot curvatures with zero curvature
/// at both ends (Thomas algorithm).
fn natural_second_derivatives(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        return m;
    }

    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let inner = n - 2;
    let mut diag = vec![0.0; inner];
    let mut upper = vec![0.0; inner];
    let mut rhs = vec![0.0; inner];

    for k in 0..inner {
        let i = k + 1;
        diag[k] = 2.0 * (h[i - 1] + h[i]);
        upper[k] = h[i];
        rhs[k] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
    }

    // Forward sweep; the sub-diagonal entry of row k is h[k]
    for k in 1..inner {
        let factor = h[k] / diag[k - 1];
        diag[k] -= factor * upper[k - 1];
        rhs[k] -= factor * rhs[k - 1];
    }

    // Back substitution
    let mut solved = vec![0.0; inner];
    solved[inner - 1] = rhs[inner - 1] / diag[inner - 1];
    for k in (0..inner - 1).rev() {
        solved[k] = (rhs[k] - upper[k] * solved[k + 1]) / diag[k];
    }

    m[1..n - 1].copy_from_slice(&solved);
    m
}
