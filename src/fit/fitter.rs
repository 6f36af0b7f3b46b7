//! Per-cell estimation of the two tax-rate surfaces.
//!
//! Given every observation for one `(age, year)` cell we:
//! - keep rows with strictly positive labor and capital income (above a floor)
//! - build the mean-centered design (`math::design`)
//! - start the six polynomial/constant parameters at 0.5 and the four rate
//!   bounds at the observed extremes of labor- and capital-dominated rows
//! - minimize the weighted squared error for ETR and MTRx independently
//! - rescale `A..E` back to levels before storing
//!
//! The cell's no-data decision (row count threshold) lives in the year
//! driver; this module only refuses subsets too small to identify the
//! parameters.

use log::{debug, warn};
use nalgebra::DVector;

use crate::domain::{ConvergencePolicy, EstimateConfig, NUM_PARAMS, Observation, ParameterVector, Target};
use crate::error::FitError;
use crate::fit::objective::WeightedSquaredError;
use crate::fit::optimizer::{FitOutcome, OptimOptions, minimize};
use crate::math::{Bound, CenteredDesign, centered_design, rescale_coefficients};

/// Starting value of `A..F` in centered space.
const COEF_INIT: f64 = 0.5;

/// Fitting options that affect how each cell is calibrated.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Fit subset keeps rows with labor and capital income above this.
    pub positive_income_floor: f64,
    /// Rows with capital (labor) income below this seed the labor (capital)
    /// rate bounds.
    pub bound_income_cutoff: f64,
    /// Lower bound on the bounded parameters.
    pub param_floor: f64,
    pub optim: OptimOptions,
    pub convergence: ConvergencePolicy,
}

impl FitOptions {
    pub fn from_config(config: &EstimateConfig) -> Self {
        Self {
            positive_income_floor: config.positive_income_floor,
            bound_income_cutoff: config.bound_income_cutoff,
            param_floor: config.param_floor,
            optim: OptimOptions {
                tolerance: config.tolerance,
                max_iters: config.max_iters,
                lbfgs_mem: config.lbfgs_mem,
            },
            convergence: config.convergence,
        }
    }

    /// `A..F`, `max_x` and `max_y` are floored; `min_x`, `min_y` are free.
    pub fn bounds(&self) -> [Bound; NUM_PARAMS] {
        let lb = Bound::Lower(self.param_floor);
        [lb, lb, lb, lb, lb, lb, lb, Bound::Free, lb, Bound::Free]
    }
}

/// Fitted surface for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFit {
    /// Level-space parameters.
    pub params: ParameterVector,
    pub converged: bool,
    pub iterations: u64,
    /// Weighted SSE at the optimum.
    pub sse: f64,
}

/// Both surfaces for one `(age, year)` cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFit {
    /// Rows used in the fit (after the positive-income restriction).
    pub n_obs: usize,
    pub etr: TargetFit,
    pub mtrx: TargetFit,
}

impl CellFit {
    pub fn target(&self, target: Target) -> &TargetFit {
        match target {
            Target::Etr => &self.etr,
            Target::Mtrx => &self.mtrx,
        }
    }
}

/// Fit ETR and MTRx surfaces on one cell's observations.
pub fn fit_cell(rows: &[Observation], opts: &FitOptions) -> Result<CellFit, FitError> {
    let floor = opts.positive_income_floor;
    let sample: Vec<&Observation> = rows
        .iter()
        .filter(|o| o.labor_income > floor && o.capital_income > floor)
        .collect();
    if sample.len() < NUM_PARAMS {
        return Err(FitError::InsufficientData {
            found: sample.len(),
            required: NUM_PARAMS,
        });
    }

    let x: Vec<f64> = sample.iter().map(|o| o.labor_income).collect();
    let y: Vec<f64> = sample.iter().map(|o| o.capital_income).collect();
    let design = centered_design(&x, &y)?;
    let phi: Vec<f64> = x.iter().zip(&y).map(|(a, b)| a / (a + b)).collect();
    let weights: Vec<f64> = sample.iter().map(|o| o.weight).collect();

    let etr = fit_target(Target::Etr, &sample, &design, &phi, &weights, opts)?;
    let mtrx = fit_target(Target::Mtrx, &sample, &design, &phi, &weights, opts)?;

    Ok(CellFit {
        n_obs: sample.len(),
        etr,
        mtrx,
    })
}

fn fit_target(
    target: Target,
    sample: &[&Observation],
    design: &CenteredDesign,
    phi: &[f64],
    weights: &[f64],
    opts: &FitOptions,
) -> Result<TargetFit, FitError> {
    let rates: Vec<f64> = sample.iter().map(|o| o.rate(target)).collect();
    let theta0 = initial_guess(target, sample, opts.bound_income_cutoff);

    let objective = WeightedSquaredError {
        design: design.matrix.clone(),
        rates: DVector::from_vec(rates),
        weights: DVector::from_column_slice(weights),
        means: design.means,
        phi: DVector::from_column_slice(phi),
    };

    let outcome = minimize(&objective, &opts.bounds(), &theta0, &opts.optim)?;
    let converged = outcome.converged();
    if let FitOutcome::Failed { run, reason } = &outcome {
        match opts.convergence {
            ConvergencePolicy::Strict => {
                return Err(FitError::DidNotConverge {
                    iterations: run.iterations,
                    reason: reason.clone(),
                });
            }
            ConvergencePolicy::Accept => {
                warn!(
                    "{} fit stopped without converging after {} iterations ({reason}); keeping last parameters",
                    target.display_name(),
                    run.iterations
                );
            }
        }
    }

    let run = outcome.run();
    debug!(
        "{} fit: n={} sse={:.6e} iters={} solver={:?}",
        target.display_name(),
        objective.len(),
        run.cost,
        run.iterations,
        run.solver
    );

    let coefs = rescale_coefficients(&run.theta, &design.means);
    let mut level = run.theta;
    level[..coefs.len()].copy_from_slice(&coefs);

    Ok(TargetFit {
        params: ParameterVector::new(level),
        converged,
        iterations: run.iterations,
        sse: run.cost,
    })
}

/// Centered-space starting point for one target.
fn initial_guess(target: Target, sample: &[&Observation], cutoff: f64) -> [f64; NUM_PARAMS] {
    let all = || sample.iter().map(|o| o.rate(target));
    let labor_dominated = sample.iter().filter(|o| o.capital_income < cutoff).map(|o| o.rate(target));
    let capital_dominated = sample.iter().filter(|o| o.labor_income < cutoff).map(|o| o.rate(target));

    let (max_x, min_x) = extremes(labor_dominated).unwrap_or_else(|| extremes(all()).unwrap_or((0.0, 0.0)));
    let (max_y, min_y) = extremes(capital_dominated).unwrap_or_else(|| extremes(all()).unwrap_or((0.0, 0.0)));

    [
        COEF_INIT, COEF_INIT, COEF_INIT, COEF_INIT, COEF_INIT, COEF_INIT, max_x, min_x, max_y, min_y,
    ]
}

/// `(max, min)` of an iterator, or `None` when it is empty.
fn extremes(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((hi, lo)) => Some((hi.max(v), lo.min(v))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{implied_mtrx, rate};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn opts() -> FitOptions {
        FitOptions::from_config(&EstimateConfig::default())
    }

    /// Noise-free cell generated by the rate surface itself.
    fn synthetic_cell(etr: &ParameterVector, mtrx: &ParameterVector) -> Vec<Observation> {
        let mut rows = Vec::new();
        for i in 0..30 {
            for j in 0..30 {
                let x = 500.0 + 4_000.0 * i as f64;
                let y = 200.0 + 2_500.0 * j as f64;
                rows.push(Observation {
                    age: 40,
                    labor_income: x,
                    capital_income: y,
                    adjusted_total_income: x + y,
                    effective_rate: rate(x, y, etr),
                    labor_marginal_rate: rate(x, y, mtrx),
                    weight: 1.0 + (i % 3) as f64,
                });
            }
        }
        rows
    }

    fn truth_from_centered(rows: &[Observation], tilde: [f64; 6], bounds: [f64; 4]) -> ParameterVector {
        let x: Vec<f64> = rows.iter().map(|o| o.labor_income).collect();
        let y: Vec<f64> = rows.iter().map(|o| o.capital_income).collect();
        let d = centered_design(&x, &y).unwrap();
        let coefs = rescale_coefficients(&tilde, &d.means);
        ParameterVector::new([
            coefs[0], coefs[1], coefs[2], coefs[3], coefs[4], tilde[5], bounds[0], bounds[1], bounds[2], bounds[3],
        ])
    }

    fn weighted_rmse(rows: &[Observation], p: &ParameterVector, target: Target) -> f64 {
        let (mut num, mut den) = (0.0, 0.0);
        for o in rows {
            let r = rate(o.labor_income, o.capital_income, p) - o.rate(target);
            num += o.weight * r * r;
            den += o.weight;
        }
        (num / den).sqrt()
    }

    const ETR_BOUNDS: [f64; 4] = [0.35, -0.05, 0.28, 0.02];
    const MTRX_BOUNDS: [f64; 4] = [0.42, 0.05, 0.33, 0.01];

    /// Noise-free cell and the surfaces that generated it.
    fn generated_cell() -> (Vec<Observation>, ParameterVector, ParameterVector) {
        let skeleton = synthetic_cell(&ParameterVector::new([1.0; NUM_PARAMS]), &ParameterVector::new([1.0; NUM_PARAMS]));
        let etr = truth_from_centered(&skeleton, [0.6, 0.4, 0.5, 0.7, 0.3, 0.8], ETR_BOUNDS);
        let mtrx = truth_from_centered(&skeleton, [0.4, 0.5, 0.6, 0.5, 0.4, 0.6], MTRX_BOUNDS);
        (synthetic_cell(&etr, &mtrx), etr, mtrx)
    }

    fn assert_recovers(fit: &ParameterVector, truth: &ParameterVector) {
        // Rate bounds are identified directly.
        for j in 6..NUM_PARAMS {
            assert_abs_diff_eq!(fit.0[j], truth.0[j], epsilon = 1e-4);
        }
        // A..F only up to a common scale.
        for j in 0..5 {
            assert_relative_eq!(fit.0[j] / fit.f(), truth.0[j] / truth.f(), max_relative = 1e-3);
        }
    }

    #[test]
    fn round_trip_recovers_the_generating_surface() {
        let (rows, etr, mtrx) = generated_cell();

        let fit = fit_cell(&rows, &opts()).unwrap();
        assert_eq!(fit.n_obs, rows.len());
        assert!(fit.etr.converged && fit.mtrx.converged);

        let etr_rmse = weighted_rmse(&rows, &fit.etr.params, Target::Etr);
        let mtrx_rmse = weighted_rmse(&rows, &fit.mtrx.params, Target::Mtrx);
        assert!(etr_rmse < 1e-5, "etr rmse {etr_rmse}");
        assert!(mtrx_rmse < 1e-5, "mtrx rmse {mtrx_rmse}");

        assert_recovers(&fit.etr.params, &etr);
        assert_recovers(&fit.mtrx.params, &mtrx);

        let p = &fit.etr.params;
        for j in [0, 1, 2, 3, 4, 5, 6, 8] {
            assert!(p.0[j] > 0.0, "parameter {j} not positive: {}", p.0[j]);
        }
        // Derived surfaces stay finite on the fitted parameters.
        assert!(implied_mtrx(30_000.0, 10_000.0, p).is_finite());
    }

    fn one_iteration(convergence: ConvergencePolicy) -> EstimateConfig {
        EstimateConfig {
            min_age: 40,
            max_age: 40,
            buckets: 1,
            max_iters: 1,
            convergence,
            ..EstimateConfig::default()
        }
    }

    #[test]
    fn strict_policy_rejects_unconverged_fits() {
        let (rows, _, _) = generated_cell();
        let cfg = one_iteration(ConvergencePolicy::Strict);
        let err = fit_cell(&rows, &FitOptions::from_config(&cfg)).unwrap_err();
        assert!(matches!(err, FitError::DidNotConverge { .. }), "{err:?}");
        assert_eq!(crate::error::AppError::from(err).exit_code(), 4);
    }

    #[test]
    fn accept_policy_keeps_unconverged_fits_and_counts_them() {
        let (rows, _, _) = generated_cell();
        let cfg = one_iteration(ConvergencePolicy::Accept);

        let fit = fit_cell(&rows, &FitOptions::from_config(&cfg)).unwrap();
        assert!(!fit.etr.converged);
        assert!(!fit.mtrx.converged);
        assert!(fit.etr.params.is_finite());

        let est = crate::fit::year::process_year(2020, &rows, &cfg).unwrap();
        assert_eq!(est.summary.estimated, 1);
        assert_eq!(est.summary.not_converged, 2);
    }

    #[test]
    fn small_positive_subset_is_insufficient() {
        let p = ParameterVector::new([0.5; NUM_PARAMS]);
        let mut rows = synthetic_cell(&p, &p);
        // Zero capital income removes almost everything from the fit subset.
        for o in rows.iter_mut().skip(5) {
            o.capital_income = 0.0;
        }
        let err = fit_cell(&rows, &opts()).unwrap_err();
        assert_eq!(
            err,
            FitError::InsufficientData {
                found: 5,
                required: NUM_PARAMS
            }
        );
    }

    #[test]
    fn initial_guess_uses_dominated_rows_then_falls_back() {
        let mk = |x: f64, y: f64, r: f64| Observation {
            age: 30,
            labor_income: x,
            capital_income: y,
            adjusted_total_income: x + y,
            effective_rate: r,
            labor_marginal_rate: r,
            weight: 1.0,
        };
        let rows = [mk(50_000.0, 100.0, 0.2), mk(60_000.0, 2_000.0, 0.25), mk(40_000.0, 40_000.0, 0.1)];
        let refs: Vec<&Observation> = rows.iter().collect();
        let g = initial_guess(Target::Etr, &refs, 3000.0);
        assert_eq!(&g[..6], &[COEF_INIT; 6]);
        assert_eq!((g[6], g[7]), (0.25, 0.2));
        // No row has labor income below the cutoff; use the whole cell.
        assert_eq!((g[8], g[9]), (0.25, 0.1));
    }

    #[test]
    fn bounds_leave_minimum_rates_free() {
        let b = opts().bounds();
        assert_eq!(b[7], Bound::Free);
        assert_eq!(b[9], Bound::Free);
        assert_eq!(b[6], Bound::Lower(1e-12));
    }
}
