//! Weighted sum of squared rate residuals and its `argmin` adapter.
//!
//! Parameters are evaluated in the centered design space (see
//! `math::design`). With `H` the centered design and `θ` the 10 parameters:
//!
//! ```text
//! s     = θ0 + … + θ4
//! Pnum  = H[:, :5] θ[0:5] + s
//! Pden  = H θ[0:6] + s
//! pred  = (phi (θ6 − θ7) + (1 − phi)(θ8 − θ9)) Pnum / Pden + phi θ7 + (1 − phi) θ9
//! cost  = Σ w (pred − rate)²
//! ```
//!
//! Adding `s` undoes the centering (`H_ij + 1 = X_ij / mean_j`), so the
//! surface is the same ratio of polynomials as `models::tax_rate::rate`
//! with coefficients `θ_j / mean_j`.

use argmin::core::{CostFunction, Error, Gradient};
use nalgebra::{DMatrix, DVector};

use crate::domain::NUM_PARAMS;
use crate::math::{Bound, CENTERED_COLS, DESIGN_COLS, to_bounded};

/// Inputs of the weighted least-squares objective for one cell and target.
#[derive(Debug, Clone)]
pub struct WeightedSquaredError {
    /// `n × 6` centered design.
    pub design: DMatrix<f64>,
    /// Observed rates.
    pub rates: DVector<f64>,
    /// Population weights (> 0).
    pub weights: DVector<f64>,
    /// Level means of the first five design columns.
    pub means: [f64; CENTERED_COLS],
    /// Labor share of income, `x / (x + y)`.
    pub phi: DVector<f64>,
}

impl WeightedSquaredError {
    fn ratio_terms(&self, theta: &[f64]) -> (DVector<f64>, DVector<f64>) {
        let coef = DVector::from_column_slice(&theta[..CENTERED_COLS]);
        let coef_sum: f64 = theta[..CENTERED_COLS].iter().sum();
        let p_num = self.design.columns(0, CENTERED_COLS) * coef;
        let p_num = p_num.add_scalar(coef_sum);
        let p_den = &p_num + DVector::from_element(p_num.len(), theta[CENTERED_COLS]);
        (p_num, p_den)
    }

    /// Predicted rates at `theta`.
    pub fn predict(&self, theta: &[f64]) -> DVector<f64> {
        let (p_num, p_den) = self.ratio_terms(theta);
        let (max_x, min_x, max_y, min_y) = (theta[6], theta[7], theta[8], theta[9]);
        DVector::from_iterator(
            self.phi.len(),
            self.phi.iter().enumerate().map(|(i, &phi)| {
                (phi * (max_x - min_x) + (1.0 - phi) * (max_y - min_y)) * (p_num[i] / p_den[i])
                    + (phi * min_x + (1.0 - phi) * min_y)
            }),
        )
    }

    /// Weighted sum of squared residuals.
    pub fn value(&self, theta: &[f64]) -> f64 {
        let pred = self.predict(theta);
        pred.iter()
            .zip(self.rates.iter())
            .zip(self.weights.iter())
            .map(|((&p, &r), &w)| w * (p - r) * (p - r))
            .sum()
    }

    /// Analytic gradient of [`value`](Self::value) with respect to `theta`.
    pub fn gradient(&self, theta: &[f64]) -> [f64; NUM_PARAMS] {
        let (p_num, p_den) = self.ratio_terms(theta);
        let (max_x, min_x, max_y, min_y) = (theta[6], theta[7], theta[8], theta[9]);
        let f = theta[CENTERED_COLS];
        let mut grad = [0.0; NUM_PARAMS];

        for i in 0..self.phi.len() {
            let phi = self.phi[i];
            let ratio = p_num[i] / p_den[i];
            let amp = phi * (max_x - min_x) + (1.0 - phi) * (max_y - min_y);
            let pred = amp * ratio + (phi * min_x + (1.0 - phi) * min_y);
            let scale = 2.0 * self.weights[i] * (pred - self.rates[i]);
            let den_sq = p_den[i] * p_den[i];

            // ∂ratio/∂θj = (H_ij + 1) F / Pden² for the polynomial coefficients.
            let d_ratio_coef = f / den_sq;
            for j in 0..CENTERED_COLS {
                grad[j] += scale * amp * (self.design[(i, j)] + 1.0) * d_ratio_coef;
            }
            grad[CENTERED_COLS] += scale * amp * (-p_num[i] / den_sq);
            grad[6] += scale * phi * ratio;
            grad[7] += scale * phi * (1.0 - ratio);
            grad[8] += scale * (1.0 - phi) * ratio;
            grad[9] += scale * (1.0 - phi) * (1.0 - ratio);
        }
        grad
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Exposes [`WeightedSquaredError`] to `argmin` over an unconstrained vector.
///
/// `u` is mapped to bounded parameters through `bounds` before evaluation and
/// the gradient is chained through the same transform.
#[derive(Debug, Clone, Copy)]
pub struct BoundedProblem<'a> {
    pub objective: &'a WeightedSquaredError,
    pub bounds: &'a [Bound; NUM_PARAMS],
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, Error> {
        let theta = to_bounded(self.bounds, u);
        let value = self.objective.value(&theta);
        if !value.is_finite() {
            return Err(Error::msg(format!("non-finite objective value {value}")));
        }
        Ok(value)
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, u: &Self::Param) -> Result<Self::Gradient, Error> {
        let theta = to_bounded(self.bounds, u);
        let g = self.objective.gradient(&theta);
        let out: Vec<f64> = g
            .iter()
            .zip(self.bounds.iter())
            .zip(u.iter())
            .map(|((&gj, b), &uj)| gj * b.jacobian(uj))
            .collect();
        if out.iter().any(|v| !v.is_finite()) {
            return Err(Error::msg("non-finite gradient"));
        }
        Ok(out)
    }
}
