//! Shared estimation pipeline used by the CLI and the integration tests.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load year -> filter/summarize -> per-age fits + gap filling -> assemble
//! grids -> bucket aggregation -> output structure.
//!
//! Years are independent and are mapped on the rayon pool; ages inside a year
//! stay sequential (see `fit::gaps`).

use std::time::{Duration, Instant};

use chrono::Utc;
use log::info;
use rayon::prelude::*;

use crate::domain::{AgeYearGrid, Cell, EstimateConfig, ParameterVector, TaxFuncFile, YearSummary};
use crate::error::AppError;
use crate::fit::{YearEstimate, aggregate_buckets, process_year};
use crate::io::ingest::MicrodataSource;

/// All computed outputs of a single `txfunc estimate` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub summaries: Vec<YearSummary>,
    /// Per-age cells, `(age − min_age) × (year − start_year)`.
    pub etr_cells: AgeYearGrid<Cell>,
    pub mtrx_cells: AgeYearGrid<Cell>,
    pub shares: AgeYearGrid<f64>,
    /// Bucketed parameters, `bucket × (year − start_year)`.
    pub etr_buckets: AgeYearGrid<Option<ParameterVector>>,
    pub mtrx_buckets: AgeYearGrid<Option<ParameterVector>>,
    pub elapsed: Duration,
    pub taxfunc: TaxFuncFile,
}

/// Execute the full estimation pipeline and return the computed outputs.
pub fn run_estimation<S>(config: &EstimateConfig, source: &S) -> Result<RunOutput, AppError>
where
    S: MicrodataSource + ?Sized,
{
    config.validate()?;
    let started = Instant::now();

    let years: Vec<i32> = config.years().collect();
    let estimate_one = |year: i32| -> Result<YearEstimate, AppError> {
        let observations = source.load_year(year)?;
        process_year(year, &observations, config)
    };
    let estimates: Vec<YearEstimate> = if config.parallel {
        years.par_iter().map(|&y| estimate_one(y)).collect::<Result<_, _>>()?
    } else {
        years.iter().map(|&y| estimate_one(y)).collect::<Result<_, _>>()?
    };

    let ages = config.age_count();
    let mut etr_cols = Vec::with_capacity(estimates.len());
    let mut mtrx_cols = Vec::with_capacity(estimates.len());
    let mut share_cols = Vec::with_capacity(estimates.len());
    let mut summaries = Vec::with_capacity(estimates.len());
    for est in estimates {
        let [etr, mtrx] = est.cells;
        etr_cols.push(etr);
        mtrx_cols.push(mtrx);
        share_cols.push(est.shares);
        summaries.push(est.summary);
    }
    let etr_cells = AgeYearGrid::from_year_columns(ages, etr_cols)?;
    let mtrx_cells = AgeYearGrid::from_year_columns(ages, mtrx_cols)?;
    let shares = AgeYearGrid::from_year_columns(ages, share_cols)?;

    let etr_buckets = aggregate_buckets(&etr_cells, &shares, config.buckets, config.normalize_buckets)?;
    let mtrx_buckets = aggregate_buckets(&mtrx_cells, &shares, config.buckets, config.normalize_buckets)?;

    let elapsed = started.elapsed();
    info!("estimated {} years in {:.2}s", summaries.len(), elapsed.as_secs_f64());

    let taxfunc = TaxFuncFile {
        tool: "txfunc".to_string(),
        generated_at: Utc::now(),
        min_age: config.min_age,
        max_age: config.max_age,
        start_year: config.start_year,
        end_year: config.end_year,
        buckets: config.buckets,
        etr_params: bucket_rows(&etr_buckets),
        mtrx_params: bucket_rows(&mtrx_buckets),
        avg_income: summaries.iter().map(|s| s.avg_income).collect(),
        total_population: summaries.iter().map(|s| s.total_population).collect(),
        elapsed_secs: elapsed.as_secs_f64(),
    };

    Ok(RunOutput {
        summaries,
        etr_cells,
        mtrx_cells,
        shares,
        etr_buckets,
        mtrx_buckets,
        elapsed,
        taxfunc,
    })
}

fn bucket_rows(grid: &AgeYearGrid<Option<ParameterVector>>) -> Vec<Vec<Option<ParameterVector>>> {
    (0..grid.rows()).map(|b| grid.row(b).to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;

    /// Source that fails for one year.
    struct Failing;

    impl MicrodataSource for Failing {
        fn load_year(&self, year: i32) -> Result<Vec<Observation>, AppError> {
            Err(AppError::new(2, format!("no file for {year}")))
        }
    }

    #[test]
    fn loader_errors_abort_the_run() {
        let config = EstimateConfig {
            start_year: 2020,
            end_year: 2021,
            ..EstimateConfig::default()
        };
        let err = run_estimation(&config, &Failing).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn invalid_config_is_rejected_before_loading() {
        let config = EstimateConfig {
            buckets: 0,
            ..EstimateConfig::default()
        };
        assert_eq!(run_estimation(&config, &Failing).unwrap_err().exit_code(), 2);
    }
}
