//! Collapse the per-age result grid onto `S` contiguous age buckets.
//!
//! Cut points are `S + 1` equally spaced values over `[0, ageCount]`. Walking
//! the buckets in order, bucket `s` spans ages `lb..=ub` where `ub` is the
//! floor of the upper cut (minus one when the cut is integral). The lower
//! boundary age carries `1 − ` the previous bucket's upper fraction and the
//! upper boundary age carries the upper cut's fractional part (1 when
//! integral). Every age's fraction is then multiplied by its population
//! share for the year.

use crate::domain::{AgeYearGrid, Cell, NUM_PARAMS, ParameterVector};
use crate::error::AppError;

/// `(age index, fraction)` pairs per bucket, before population weighting.
pub fn bucket_fractions(age_count: usize, buckets: usize) -> Vec<Vec<(usize, f64)>> {
    let mut out = Vec::with_capacity(buckets);
    let mut lb = 0usize;
    let mut lb_frac = 1.0;
    for s in 0..buckets {
        let cut = age_count as f64 * (s + 1) as f64 / buckets as f64;
        let mut ub = cut.floor() as usize;
        let mut ub_frac = cut - cut.floor();
        if ub_frac == 0.0 {
            ub_frac = 1.0;
            ub -= 1;
        }
        let ub = ub.min(age_count - 1);

        let spans = (lb..=ub)
            .map(|k| {
                let mut f = 1.0;
                if k == lb {
                    f *= lb_frac;
                }
                if k == ub {
                    f *= ub_frac;
                }
                (k, f)
            })
            .collect();
        out.push(spans);

        lb = ub;
        lb_frac = 1.0 - ub_frac;
    }
    out
}

/// Population-weighted bucket aggregates.
///
/// With `buckets == ageCount` the estimates are copied unchanged. An
/// aggregate is `None` when a contributing age with positive weight is
/// `Missing`, when no age carries weight and one of them is `Missing`, or
/// (when normalizing) when the bucket has no weight at all.
pub fn aggregate_buckets(
    cells: &AgeYearGrid<Cell>,
    shares: &AgeYearGrid<f64>,
    buckets: usize,
    normalize: bool,
) -> Result<AgeYearGrid<Option<ParameterVector>>, AppError> {
    let ages = cells.rows();
    let years = cells.years();
    if shares.rows() != ages || shares.years() != years {
        return Err(AppError::new(4, "Population shares do not match the result grid."));
    }
    if buckets == 0 || buckets > ages {
        return Err(AppError::new(
            2,
            format!("Bucket count must be in [1, {ages}] (got {buckets})."),
        ));
    }

    let mut out = AgeYearGrid::filled(buckets, years, None);
    if buckets == ages {
        for row in 0..ages {
            for t in 0..years {
                out.set(row, t, cells.get(row, t).and_then(Cell::params).copied());
            }
        }
        return Ok(out);
    }

    let fractions = bucket_fractions(ages, buckets);
    for (s, spans) in fractions.iter().enumerate() {
        for t in 0..years {
            out.set(s, t, aggregate_one(cells, shares, spans, t, normalize));
        }
    }
    Ok(out)
}

fn aggregate_one(
    cells: &AgeYearGrid<Cell>,
    shares: &AgeYearGrid<f64>,
    spans: &[(usize, f64)],
    year: usize,
    normalize: bool,
) -> Option<ParameterVector> {
    let mut acc = [0.0; NUM_PARAMS];
    let mut weight_sum = 0.0;
    let mut skipped_missing = false;
    for &(age, frac) in spans {
        let cell = cells.get(age, year)?;
        let w = frac * shares.get(age, year).copied().unwrap_or(0.0);
        if w == 0.0 {
            skipped_missing |= cell.is_missing();
            continue;
        }
        let p = cell.params()?;
        for (a, v) in acc.iter_mut().zip(p.as_slice()) {
            *a += w * v;
        }
        weight_sum += w;
    }
    // Nothing contributed and the bucket touches a missing age.
    if weight_sum <= 0.0 && skipped_missing {
        return None;
    }
    if normalize {
        if weight_sum <= 0.0 {
            return None;
        }
        acc.iter_mut().for_each(|a| *a /= weight_sum);
    }
    Some(ParameterVector::new(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(v: f64) -> ParameterVector {
        ParameterVector::new([v; NUM_PARAMS])
    }

    fn grid(values: &[Cell], shares: &[f64]) -> (AgeYearGrid<Cell>, AgeYearGrid<f64>) {
        (
            AgeYearGrid::from_year_columns(values.len(), vec![values.to_vec()]).unwrap(),
            AgeYearGrid::from_year_columns(shares.len(), vec![shares.to_vec()]).unwrap(),
        )
    }

    #[test]
    fn identity_when_buckets_equal_ages() {
        let cells = [Cell::Estimated(p(1.0)), Cell::Interpolated(p(2.0)), Cell::Missing];
        let (c, s) = grid(&cells, &[0.2, 0.3, 0.5]);
        let out = aggregate_buckets(&c, &s, 3, false).unwrap();
        assert_eq!(out.get(0, 0), Some(&Some(p(1.0))));
        assert_eq!(out.get(1, 0), Some(&Some(p(2.0))));
        assert_eq!(out.get(2, 0), Some(&None));
    }

    #[test]
    fn integral_cuts_split_ages_cleanly() {
        let cells = [
            Cell::Estimated(p(1.0)),
            Cell::Estimated(p(10.0)),
            Cell::Estimated(p(100.0)),
            Cell::Estimated(p(1000.0)),
        ];
        let (c, s) = grid(&cells, &[0.1, 0.2, 0.3, 0.4]);
        let out = aggregate_buckets(&c, &s, 2, false).unwrap();

        let b0 = out.get(0, 0).copied().flatten().unwrap();
        let b1 = out.get(1, 0).copied().flatten().unwrap();
        assert_relative_eq!(b0.a(), 0.1 * 1.0 + 0.2 * 10.0, epsilon = 1e-12);
        assert_relative_eq!(b1.a(), 0.3 * 100.0 + 0.4 * 1000.0, epsilon = 1e-12);
    }

    #[test]
    fn fractional_cuts_share_the_boundary_age() {
        // 3 ages into 2 buckets: cut at 1.5.
        let fr = bucket_fractions(3, 2);
        assert_eq!(fr[0], vec![(0, 1.0), (1, 0.5)]);
        assert_eq!(fr[1], vec![(1, 0.5), (2, 1.0)]);

        let cells = [Cell::Estimated(p(2.0)), Cell::Estimated(p(4.0)), Cell::Estimated(p(6.0))];
        let (c, s) = grid(&cells, &[0.25, 0.5, 0.25]);
        let raw = aggregate_buckets(&c, &s, 2, false).unwrap();
        assert_relative_eq!(raw.get(0, 0).copied().flatten().unwrap().a(), 0.25 * 2.0 + 0.25 * 4.0);

        let norm = aggregate_buckets(&c, &s, 2, true).unwrap();
        assert_relative_eq!(norm.get(0, 0).copied().flatten().unwrap().a(), 3.0);
        assert_relative_eq!(norm.get(1, 0).copied().flatten().unwrap().a(), 5.0);
    }

    #[test]
    fn fractions_cover_every_age_once() {
        for (ages, buckets) in [(80, 7), (80, 80), (10, 3), (5, 1)] {
            let fr = bucket_fractions(ages, buckets);
            let mut total = vec![0.0; ages];
            for spans in &fr {
                for &(k, f) in spans {
                    total[k] += f;
                }
            }
            for t in &total {
                assert_relative_eq!(*t, 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn missing_age_with_weight_poisons_bucket() {
        let cells = [Cell::Estimated(p(1.0)), Cell::Missing, Cell::Estimated(p(3.0)), Cell::Estimated(p(4.0))];
        let (c, s) = grid(&cells, &[0.25, 0.25, 0.25, 0.25]);
        let out = aggregate_buckets(&c, &s, 2, false).unwrap();
        assert_eq!(out.get(0, 0), Some(&None));
        // Age 1 carries zero fraction in the second bucket.
        assert!(out.get(1, 0).copied().flatten().is_some());
    }

    #[test]
    fn weightless_missing_year_yields_no_buckets() {
        let cells = [Cell::Missing; 4];
        let (c, s) = grid(&cells, &[0.0; 4]);
        let out = aggregate_buckets(&c, &s, 2, false).unwrap();
        assert!(out.iter().all(Option::is_none));
    }

    #[test]
    fn rejects_too_many_buckets() {
        let (c, s) = grid(&[Cell::Missing], &[1.0]);
        assert_eq!(aggregate_buckets(&c, &s, 2, false).unwrap_err().exit_code(), 2);
    }
}
