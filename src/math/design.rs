//! Mean-centered design matrix for the surface fit.
//!
//! Columns are `[x², y², xy, x, y, 1]`. The first five are rescaled to
//! percent deviations from their mean, `(v − mean) / mean`; the constant
//! column stays exactly 1. Working in this space keeps the coefficients on
//! comparable scales (raw `x²` is ~1e9 while `x` is ~1e4).
//!
//! A coefficient `c̃_j` fitted in centered space maps back to levels as
//! `c_j = c̃_j / mean_j`.

use nalgebra::DMatrix;

use crate::error::FitError;

/// Number of polynomial columns that are mean-centered.
pub const CENTERED_COLS: usize = 5;
/// Total columns including the constant.
pub const DESIGN_COLS: usize = 6;

#[derive(Debug, Clone)]
pub struct CenteredDesign {
    /// `n × 6` centered design.
    pub matrix: DMatrix<f64>,
    /// Level means of the first five columns.
    pub means: [f64; CENTERED_COLS],
}

/// Build the centered design from labor (`x`) and capital (`y`) incomes.
pub fn centered_design(x: &[f64], y: &[f64]) -> Result<CenteredDesign, FitError> {
    if x.len() != y.len() {
        return Err(FitError::NonFinite {
            what: format!("income vectors differ in length ({} vs {})", x.len(), y.len()),
        });
    }
    let n = x.len();
    if n == 0 {
        return Err(FitError::InsufficientData { found: 0, required: 1 });
    }

    let mut raw = DMatrix::<f64>::zeros(n, CENTERED_COLS);
    for i in 0..n {
        let (xi, yi) = (x[i], y[i]);
        raw[(i, 0)] = xi * xi;
        raw[(i, 1)] = yi * yi;
        raw[(i, 2)] = xi * yi;
        raw[(i, 3)] = xi;
        raw[(i, 4)] = yi;
    }

    let mut means = [0.0; CENTERED_COLS];
    for (j, m) in means.iter_mut().enumerate() {
        *m = raw.column(j).mean();
        if !(m.is_finite() && *m > 0.0) {
            return Err(FitError::NonFinite {
                what: format!("design column {j} has mean {m}"),
            });
        }
    }

    let mut matrix = DMatrix::<f64>::zeros(n, DESIGN_COLS);
    for j in 0..CENTERED_COLS {
        let m = means[j];
        for i in 0..n {
            matrix[(i, j)] = (raw[(i, j)] - m) / m;
        }
    }
    matrix.column_mut(DESIGN_COLS - 1).fill(1.0);

    Ok(CenteredDesign { matrix, means })
}

/// Map centered-space polynomial coefficients back to levels.
pub fn rescale_coefficients(centered: &[f64], means: &[f64; CENTERED_COLS]) -> [f64; CENTERED_COLS] {
    let mut out = [0.0; CENTERED_COLS];
    for j in 0..CENTERED_COLS {
        out[j] = centered[j] / means[j];
    }
    out
}
