//! Year driver: one year's microdata in, one year's filled cells out.
//!
//! `process_year` is pure: it owns no shared state, so years can be mapped
//! in parallel by the caller. Ages inside a year are processed strictly in
//! order by `fit::gaps`.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::domain::{Cell, EstimateConfig, Observation, YearSummary};
use crate::error::{AppError, FitError};
use crate::fit::fitter::{FitOptions, fit_cell};
use crate::fit::gaps::fill_year;

/// Everything one year contributes to the result arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct YearEstimate {
    pub summary: YearSummary,
    /// Per-target cells over the configured ages, indexed by `Target::index`.
    pub cells: [Vec<Cell>; 2],
    /// Population share of each configured age.
    pub shares: Vec<f64>,
}

/// Weighted mean adjusted total income and total weight.
pub fn year_totals(observations: &[Observation]) -> (f64, f64) {
    let total: f64 = observations.iter().map(|o| o.weight).sum();
    let weighted: f64 = observations.iter().map(|o| o.adjusted_total_income * o.weight).sum();
    (weighted / total, total)
}

/// Drop rows with an out-of-range (or non-finite) effective rate or an
/// adjusted total income below the floor.
pub fn filter_outliers(observations: &[Observation], config: &EstimateConfig) -> Vec<Observation> {
    observations
        .iter()
        .filter(|o| {
            o.effective_rate.is_finite()
                && o.effective_rate >= config.rate_min
                && o.effective_rate <= config.rate_max
                && o.adjusted_total_income >= config.income_floor
        })
        .cloned()
        .collect()
}

/// Observed ages clamped to the configured range.
pub fn observed_age_range(by_age: &BTreeMap<u32, Vec<Observation>>, config: &EstimateConfig) -> Option<(u32, u32)> {
    let lo = (*by_age.keys().next()?).max(config.min_age);
    let hi = (*by_age.keys().next_back()?).min(config.max_age);
    (lo <= hi).then_some((lo, hi))
}

/// Weight share of every configured age (0 where the age is absent).
pub fn population_shares(
    by_age: &BTreeMap<u32, Vec<Observation>>,
    total_population: f64,
    config: &EstimateConfig,
) -> Vec<f64> {
    (config.min_age..=config.max_age)
        .map(|age| {
            by_age
                .get(&age)
                .map(|rows| rows.iter().map(|o| o.weight).sum::<f64>() / total_population)
                .unwrap_or(0.0)
        })
        .collect()
}

/// Estimate and gap-fill every configured age of one year.
pub fn process_year(year: i32, observations: &[Observation], config: &EstimateConfig) -> Result<YearEstimate, AppError> {
    if observations.is_empty() {
        warn!("year {year}: no observations; every cell left missing");
        return Ok(empty_year(year, config));
    }
    let (avg_income, total_population) = year_totals(observations);
    if !(total_population.is_finite() && total_population > 0.0) {
        return Err(AppError::new(
            2,
            format!("Year {year}: total population weight must be > 0 (got {total_population})."),
        ));
    }

    let filtered = filter_outliers(observations, config);
    let mut by_age: BTreeMap<u32, Vec<Observation>> = BTreeMap::new();
    for o in &filtered {
        by_age.entry(o.age).or_default().push(o.clone());
    }

    let age_range = observed_age_range(&by_age, config);
    let shares = population_shares(&by_age, total_population, config);
    let opts = FitOptions::from_config(config);

    let mut not_converged = 0usize;
    let fill = fill_year(config.min_age, config.max_age, age_range, |age| {
        let rows = by_age.get(&age).map(Vec::as_slice).unwrap_or(&[]);
        if rows.len() < config.min_obs {
            debug!("year {year} age {age}: {} rows < {}; no-data cell", rows.len(), config.min_obs);
            return Ok(None);
        }
        match fit_cell(rows, &opts) {
            Ok(fit) => {
                not_converged += usize::from(!fit.etr.converged) + usize::from(!fit.mtrx.converged);
                debug!(
                    "year {year} age {age}: n={} etr_sse={:.4e} mtrx_sse={:.4e}",
                    fit.n_obs, fit.etr.sse, fit.mtrx.sse
                );
                Ok(Some([fit.etr.params, fit.mtrx.params]))
            }
            Err(FitError::InsufficientData { found, required }) => {
                warn!("year {year} age {age}: only {found} rows with positive incomes (need {required}); no-data cell");
                Ok(None)
            }
            Err(e) => {
                let err = AppError::from(e);
                Err(AppError::new(
                    err.exit_code(),
                    format!("Year {year}, age {age}: {}", err.message()),
                ))
            }
        }
    })?;

    let counts = fill.counts();
    info!(
        "year {year}: {} rows ({} after filter), estimated={} interpolated={} extrapolated={} missing={}",
        observations.len(),
        filtered.len(),
        counts.estimated,
        counts.interpolated,
        counts.extrapolated,
        counts.missing
    );

    Ok(YearEstimate {
        summary: YearSummary {
            year,
            n_raw: observations.len(),
            n_filtered: filtered.len(),
            avg_income,
            total_population,
            age_range,
            estimated: counts.estimated,
            interpolated: counts.interpolated,
            extrapolated: counts.extrapolated,
            missing: counts.missing,
            not_converged,
        },
        cells: fill.into_cells(),
        shares,
    })
}

/// A year without any microdata: all cells missing, zero shares and totals.
fn empty_year(year: i32, config: &EstimateConfig) -> YearEstimate {
    let ages = config.age_count();
    YearEstimate {
        summary: YearSummary {
            year,
            n_raw: 0,
            n_filtered: 0,
            avg_income: 0.0,
            total_population: 0.0,
            age_range: None,
            estimated: 0,
            interpolated: 0,
            extrapolated: 0,
            missing: ages,
            not_converged: 0,
        },
        cells: [vec![Cell::Missing; ages], vec![Cell::Missing; ages]],
        shares: vec![0.0; ages],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn obs(age: u32, ati: f64, etr: f64, weight: f64) -> Observation {
        Observation {
            age,
            labor_income: ati * 0.7,
            capital_income: ati * 0.3,
            adjusted_total_income: ati,
            effective_rate: etr,
            labor_marginal_rate: etr,
            weight,
        }
    }

    fn config(min_age: u32, max_age: u32) -> EstimateConfig {
        EstimateConfig {
            min_age,
            max_age,
            buckets: (max_age - min_age + 1) as usize,
            ..EstimateConfig::default()
        }
    }

    #[test]
    fn totals_use_untruncated_rows() {
        let rows = [obs(30, 100.0, 0.9, 1.0), obs(30, 300.0, 0.1, 3.0)];
        let (avg, total) = year_totals(&rows);
        assert_relative_eq!(avg, 250.0);
        assert_relative_eq!(total, 4.0);
    }

    #[test]
    fn filter_drops_rate_and_income_outliers() {
        let cfg = config(21, 80);
        let rows = [
            obs(30, 1_000.0, 0.2, 1.0),
            obs(30, 1_000.0, 0.51, 1.0),
            obs(30, 1_000.0, -0.16, 1.0),
            obs(30, 4.0, 0.1, 1.0),
            obs(30, 1_000.0, f64::NAN, 1.0),
            obs(30, 1_000.0, -0.15, 1.0),
            obs(30, 5.0, 0.5, 1.0),
        ];
        let kept = filter_outliers(&rows, &cfg);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn age_range_is_clamped_to_configuration() {
        let cfg = config(21, 80);
        let mut by_age = BTreeMap::new();
        by_age.insert(18, vec![obs(18, 10.0, 0.1, 1.0)]);
        by_age.insert(85, vec![obs(85, 10.0, 0.1, 1.0)]);
        assert_eq!(observed_age_range(&by_age, &cfg), Some((21, 80)));

        let mut outside = BTreeMap::new();
        outside.insert(90, vec![obs(90, 10.0, 0.1, 1.0)]);
        assert_eq!(observed_age_range(&outside, &cfg), None);
        assert_eq!(observed_age_range(&BTreeMap::new(), &cfg), None);
    }

    #[test]
    fn shares_divide_age_weight_by_year_total() {
        let cfg = config(30, 32);
        let mut by_age = BTreeMap::new();
        by_age.insert(30, vec![obs(30, 10.0, 0.1, 2.0), obs(30, 10.0, 0.1, 1.0)]);
        by_age.insert(32, vec![obs(32, 10.0, 0.1, 5.0)]);
        let shares = population_shares(&by_age, 10.0, &cfg);
        assert_eq!(shares.len(), 3);
        assert_relative_eq!(shares[0], 0.3);
        assert_relative_eq!(shares[1], 0.0);
        assert_relative_eq!(shares[2], 0.5);
    }

    #[test]
    fn sparse_year_is_all_missing_with_summary() {
        let cfg = config(30, 32);
        let rows: Vec<Observation> = (30..=32).map(|a| obs(a, 1_000.0, 0.1, 1.0)).collect();
        let est = process_year(2020, &rows, &cfg).unwrap();
        assert_eq!(est.summary.missing, 3);
        assert_eq!(est.summary.estimated, 0);
        assert_eq!(est.summary.age_range, Some((30, 32)));
        assert!(est.cells[0].iter().all(Cell::is_missing));
        assert_relative_eq!(est.shares.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn empty_year_leaves_every_cell_missing() {
        let cfg = config(21, 80);
        let est = process_year(2020, &[], &cfg).unwrap();
        assert_eq!(est.summary.n_raw, 0);
        assert_eq!(est.summary.age_range, None);
        assert_eq!(est.summary.missing, 60);
        assert_eq!(est.summary.total_population, 0.0);
        for col in &est.cells {
            assert_eq!(col.len(), 60);
            assert!(col.iter().all(Cell::is_missing));
        }
        assert!(est.shares.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn zero_total_weight_is_an_input_error() {
        let rows = [obs(30, 1_000.0, 0.1, 0.0)];
        let err = process_year(2020, &rows, &config(21, 80)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
