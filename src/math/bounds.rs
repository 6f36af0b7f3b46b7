//! Box-constraint handling by reparameterization.
//!
//! The optimizer works on an unconstrained vector `u`. A lower-bounded
//! parameter is recovered as `θ = lb + softplus(u)`, which keeps it strictly
//! above `lb` for every finite `u`; free parameters pass through unchanged.
//! Gradients are mapped with `∂θ/∂u = sigmoid(u)`.

/// Guarded `ln(1 + exp(x))`.
pub fn softplus(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp().ln_1p() }
}

/// Inverse of [`softplus`] on `(0, ∞)`.
pub fn softplus_inv(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp_m1().ln() }
}

/// Logistic function; the derivative of [`softplus`].
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Bound on one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Free,
    Lower(f64),
}

/// Smallest gap above a lower bound used for a starting value.
///
/// Starting exactly on the bound would map to `u = −∞`.
const START_GAP: f64 = 1e-6;

impl Bound {
    pub fn to_bounded(self, u: f64) -> f64 {
        match self {
            Bound::Free => u,
            Bound::Lower(lb) => lb + softplus(u),
        }
    }

    pub fn to_unbounded(self, theta: f64) -> f64 {
        match self {
            Bound::Free => theta,
            Bound::Lower(lb) => softplus_inv((theta - lb).max(START_GAP)),
        }
    }

    /// `∂θ/∂u` at `u`.
    pub fn jacobian(self, u: f64) -> f64 {
        match self {
            Bound::Free => 1.0,
            Bound::Lower(_) => sigmoid(u),
        }
    }
}

pub fn to_bounded(bounds: &[Bound], u: &[f64]) -> Vec<f64> {
    bounds.iter().zip(u).map(|(b, &v)| b.to_bounded(v)).collect()
}

pub fn to_unbounded(bounds: &[Bound], theta: &[f64]) -> Vec<f64> {
    bounds.iter().zip(theta).map(|(b, &v)| b.to_unbounded(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softplus_round_trips() {
        for &x in &[1e-6, 0.1, 1.0, 5.0, 25.0] {
            let t = softplus_inv(x);
            assert!((softplus(t) - x).abs() < 1e-9 * x.max(1.0), "x={x}");
        }
    }

    #[test]
    fn lower_bound_is_respected() {
        let b = Bound::Lower(1e-12);
        for &u in &[-50.0, -5.0, 0.0, 5.0, 50.0] {
            assert!(b.to_bounded(u) > 0.0);
        }
        assert_eq!(Bound::Free.to_bounded(-3.0), -3.0);
    }

    #[test]
    fn starting_value_on_bound_is_nudged_inside() {
        let b = Bound::Lower(0.0);
        let u = b.to_unbounded(0.0);
        assert!(u.is_finite());
        assert!((b.to_bounded(u) - START_GAP).abs() < 1e-12);
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let b = Bound::Lower(0.5);
        for &u in &[-3.0, 0.0, 2.0] {
            let h = 1e-6;
            let fd = (b.to_bounded(u + h) - b.to_bounded(u - h)) / (2.0 * h);
            assert!((b.jacobian(u) - fd).abs() < 1e-8);
        }
    }
}
