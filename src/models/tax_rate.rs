//! Ratio-of-polynomials tax-rate surface and its income derivatives.
//!
//! With `x` = labor income, `y` = capital income and parameters
//! `(A, B, C, D, E, F, max_x, min_x, max_y, min_y)`:
//!
//! ```text
//! phi  = x / (x + y)
//! Pnum = A x² + B y² + C x y + D x + E y
//! Q    = Pnum + F
//! Ω    = Pnum / Q
//! τ    = (phi (max_x − min_x) + (1 − phi)(max_y − min_y)) Ω + phi min_x + (1 − phi) min_y
//! ```
//!
//! The same form is used for the effective rate and for the directly
//! estimated labor marginal rate. The *implied* labor marginal rate is the
//! x-derivative of total liability under the effective-rate surface.
//!
//! No domain checks are performed: `x + y = 0` or `Q = 0` produce non-finite
//! values that propagate to the caller.

use crate::domain::ParameterVector;

fn p_num(x: f64, y: f64, p: &ParameterVector) -> f64 {
    p.a() * x * x + p.b() * y * y + p.c() * x * y + p.d() * x + p.e() * y
}

/// Ratio of polynomials `Ω(x, y)`.
pub fn omega(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let num = p_num(x, y, p);
    num / (num + p.f())
}

/// `∂Ω/∂x = F (2Ax + Cy + D) / Q²`.
pub fn d_omega_dx(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let q = p_num(x, y, p) + p.f();
    p.f() * (2.0 * p.a() * x + p.c() * y + p.d()) / (q * q)
}

/// `∂Ω/∂y = F (2By + Cx + E) / Q²`.
pub fn d_omega_dy(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let q = p_num(x, y, p) + p.f();
    p.f() * (2.0 * p.b() * y + p.c() * x + p.e()) / (q * q)
}

/// `∂²Ω/∂x²`.
pub fn d2_omega_dx2(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let (a, b, c, d, e, f) = (p.a(), p.b(), p.c(), p.d(), p.e(), p.f());
    let q = p_num(x, y, p) + f;
    2.0 * f
        * ((-3.0 * (a * a) * (x * x)) + ((a * b - c * c) * (y * y))
            - (3.0 * a * c * x * y)
            - (3.0 * a * d * x)
            + ((a * e - 2.0 * c * d) * y)
            + (a * f - d * d))
        / (q * q * q)
}

/// `∂²Ω/∂y²`.
pub fn d2_omega_dy2(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let (a, b, c, d, e, f) = (p.a(), p.b(), p.c(), p.d(), p.e(), p.f());
    let q = p_num(x, y, p) + f;
    2.0 * f
        * ((-3.0 * (b * b) * (y * y)) + ((a * b - c * c) * (x * x))
            - (3.0 * b * c * x * y)
            - (3.0 * b * e * y)
            + ((b * d - 2.0 * c * e) * x)
            + (b * f - e * e))
        / (q * q * q)
}

/// Tax rate at `(x, y)`.
///
/// Used for both the effective rate and the estimated labor marginal rate.
pub fn rate(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let phi = x / (x + y);
    let num = p_num(x, y, p);
    let den = num + p.f();
    (phi * (p.max_x() - p.min_x()) + (1.0 - phi) * (p.max_y() - p.min_y())) * (num / den)
        + (phi * p.min_x() + (1.0 - phi) * p.min_y())
}

/// Labor marginal rate implied by an effective-rate surface.
pub fn implied_mtrx(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let dx = p.max_x() - p.min_x();
    let dy = p.max_y() - p.min_y();
    dx * omega(x, y, p) + (dx * x + dy * y) * d_omega_dx(x, y, p) + p.min_x()
}

/// Second derivative of total liability with respect to labor income.
pub fn dmtrx(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let dx = p.max_x() - p.min_x();
    let dy = p.max_y() - p.min_y();
    2.0 * dx * d_omega_dx(x, y, p) + (dx * x + dy * y) * d2_omega_dx2(x, y, p)
}

/// Second derivative of total liability with respect to capital income.
pub fn dmtry(x: f64, y: f64, p: &ParameterVector) -> f64 {
    let dx = p.max_x() - p.min_x();
    let dy = p.max_y() - p.min_y();
    2.0 * dy * d_omega_dy(x, y, p) + (dx * x + dy * y) * d2_omega_dy2(x, y, p)
}

/// Apply a pointwise surface function to matched `x`/`y` inputs.
///
/// Works the same for vectors and for flattened 2-D meshes.
///
/// # Panics
/// Panics if `x` and `y` differ in length.
pub fn evaluate(
    f: fn(f64, f64, &ParameterVector) -> f64,
    x: &[f64],
    y: &[f64],
    p: &ParameterVector,
) -> Vec<f64> {
    assert_eq!(x.len(), y.len(), "income inputs must have matching lengths");
    x.iter().zip(y).map(|(&xi, &yi)| f(xi, yi, p)).collect()
}

/// Row-major mesh over `x_support × y_support`: entry `[j][i] = f(x_i, y_j)`.
pub fn evaluate_mesh(
    f: fn(f64, f64, &ParameterVector) -> f64,
    x_support: &[f64],
    y_support: &[f64],
    p: &ParameterVector,
) -> Vec<Vec<f64>> {
    y_support
        .iter()
        .map(|&y| x_support.iter().map(|&x| f(x, y, p)).collect())
        .collect()
}

/// `n` log-spaced points on `[lo, hi]` (both > 0).
pub fn log_support(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    let n = n.max(2);
    let (ln_lo, ln_hi) = (lo.ln(), hi.ln());
    let step = (ln_hi - ln_lo) / (n as f64 - 1.0);
    (0..n).map(|i| (ln_lo + step * i as f64).exp()).collect()
}
