//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during estimation
//! - exported to JSON/CSV
//! - reloaded later by downstream consumers that evaluate the fitted surfaces

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Number of parameters in one tax-rate surface.
pub const NUM_PARAMS: usize = 10;

/// Which observed rate a surface is fitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Effective tax rate (liability / adjusted total income).
    Etr,
    /// Marginal tax rate on labor income.
    Mtrx,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::Etr, Target::Mtrx];

    pub fn index(self) -> usize {
        match self {
            Target::Etr => 0,
            Target::Mtrx => 1,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Target::Etr => "ETR",
            Target::Mtrx => "MTRx",
        }
    }
}

/// What to do when the optimizer stops without reporting convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConvergencePolicy {
    /// Keep whatever parameters the optimizer ended on (logged and counted).
    Accept,
    /// Fail the run with a `DidNotConverge` error.
    Strict,
}

/// One individual record of the microdata for a single year.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub age: u32,
    pub labor_income: f64,
    pub capital_income: f64,
    pub adjusted_total_income: f64,
    pub effective_rate: f64,
    pub labor_marginal_rate: f64,
    /// Population weight (> 0).
    pub weight: f64,
}

impl Observation {
    /// Observed rate for the given target.
    pub fn rate(&self, target: Target) -> f64 {
        match target {
            Target::Etr => self.effective_rate,
            Target::Mtrx => self.labor_marginal_rate,
        }
    }
}

/// `(A, B, C, D, E, F, max_x, min_x, max_y, min_y)`.
///
/// `A..E` multiply `x², y², xy, x, y` in the numerator polynomial, `F` is the
/// denominator-only constant, and the last four bound the rate as labor
/// (`x`) or capital (`y`) income dominates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector(pub [f64; NUM_PARAMS]);

impl ParameterVector {
    pub fn new(values: [f64; NUM_PARAMS]) -> Self {
        Self(values)
    }

    /// Build from a slice; `None` unless it has exactly `NUM_PARAMS` entries.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let arr: [f64; NUM_PARAMS] = values.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn a(&self) -> f64 {
        self.0[0]
    }
    pub fn b(&self) -> f64 {
        self.0[1]
    }
    pub fn c(&self) -> f64 {
        self.0[2]
    }
    pub fn d(&self) -> f64 {
        self.0[3]
    }
    pub fn e(&self) -> f64 {
        self.0[4]
    }
    pub fn f(&self) -> f64 {
        self.0[5]
    }
    pub fn max_x(&self) -> f64 {
        self.0[6]
    }
    pub fn min_x(&self) -> f64 {
        self.0[7]
    }
    pub fn max_y(&self) -> f64 {
        self.0[8]
    }
    pub fn min_y(&self) -> f64 {
        self.0[9]
    }

    /// Element-wise `self + t * (other - self)`.
    pub fn lerp(&self, other: &ParameterVector, t: f64) -> ParameterVector {
        let mut out = [0.0; NUM_PARAMS];
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.0[i] + t * (other.0[i] - self.0[i]);
        }
        ParameterVector(out)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// One (age, year) entry of a result array.
///
/// Missing cells are explicit rather than NaN-filled so consumers have to
/// decide what to do with them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum Cell {
    /// No estimate and no bounding estimate to fill from.
    Missing,
    /// Fitted directly on this cell's observations.
    Estimated(ParameterVector),
    /// Linear interpolation across an interior gap.
    Interpolated(ParameterVector),
    /// Copied from the nearest estimate (leading/trailing gap or out-of-range age).
    Extrapolated(ParameterVector),
}

impl Cell {
    pub fn params(&self) -> Option<&ParameterVector> {
        match self {
            Cell::Missing => None,
            Cell::Estimated(p) | Cell::Interpolated(p) | Cell::Extrapolated(p) => Some(p),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Cell::Missing => "missing",
            Cell::Estimated(_) => "estimated",
            Cell::Interpolated(_) => "interpolated",
            Cell::Extrapolated(_) => "extrapolated",
        }
    }
}

/// Dense `(row × year)` grid where a row is an age (or an age bucket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeYearGrid<T> {
    rows: usize,
    years: usize,
    data: Vec<T>,
}

impl<T: Clone> AgeYearGrid<T> {
    pub fn filled(rows: usize, years: usize, value: T) -> Self {
        Self {
            rows,
            years,
            data: vec![value; rows * years],
        }
    }
}

impl<T> AgeYearGrid<T> {
    /// Assemble from per-year columns (each of length `rows`).
    pub fn from_year_columns(rows: usize, columns: Vec<Vec<T>>) -> Result<Self, AppError> {
        let years = columns.len();
        if columns.iter().any(|c| c.len() != rows) {
            return Err(AppError::new(4, "Per-year column has the wrong number of ages."));
        }
        // Store row-major: data[row * years + year].
        let mut slots: Vec<Option<T>> = Vec::with_capacity(rows * years);
        slots.resize_with(rows * years, || None);
        for (year, col) in columns.into_iter().enumerate() {
            for (row, v) in col.into_iter().enumerate() {
                slots[row * years + year] = Some(v);
            }
        }
        let data = slots.into_iter().flatten().collect::<Vec<T>>();
        Ok(Self { rows, years, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn years(&self) -> usize {
        self.years
    }

    pub fn get(&self, row: usize, year: usize) -> Option<&T> {
        if row >= self.rows || year >= self.years {
            return None;
        }
        self.data.get(row * self.years + year)
    }

    pub fn set(&mut self, row: usize, year: usize, value: T) {
        if row < self.rows && year < self.years {
            self.data[row * self.years + year] = value;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Values of one row across years.
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.years;
        &self.data[start..start + self.years]
    }
}

/// Per-year descriptive statistics recorded by the year driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    /// Rows returned by the loader.
    pub n_raw: usize,
    /// Rows surviving the outlier filter.
    pub n_filtered: usize,
    /// Weighted mean adjusted total income (untruncated data).
    pub avg_income: f64,
    /// Sum of population weights (untruncated data).
    pub total_population: f64,
    /// Observed age range clamped to the configured ages.
    pub age_range: Option<(u32, u32)>,
    pub estimated: usize,
    pub interpolated: usize,
    pub extrapolated: usize,
    pub missing: usize,
    /// Fits that stopped without meeting the convergence criterion.
    pub not_converged: usize,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct EstimateConfig {
    pub min_age: u32,
    pub max_age: u32,
    pub start_year: i32,
    pub end_year: i32,
    /// Number of age buckets in the aggregated output.
    pub buckets: usize,

    /// Minimum rows per (age, year) cell before a direct fit is attempted.
    pub min_obs: usize,
    /// Rows with an effective rate outside `[rate_min, rate_max]` are dropped.
    pub rate_min: f64,
    pub rate_max: f64,
    /// Rows with adjusted total income below this are dropped.
    pub income_floor: f64,

    /// Fit subset keeps rows with labor and capital income above this.
    pub positive_income_floor: f64,
    /// Income cutoff isolating labor- or capital-dominated rows for the
    /// rate-bound starting values.
    pub bound_income_cutoff: f64,
    /// Lower bound for the bounded parameters.
    pub param_floor: f64,
    pub tolerance: f64,
    pub max_iters: u64,
    pub lbfgs_mem: usize,
    pub convergence: ConvergencePolicy,

    /// Divide each bucket aggregate by its weight sum.
    pub normalize_buckets: bool,
    /// Estimate years on the rayon pool.
    pub parallel: bool,

    pub output: Option<PathBuf>,
    pub export_cells: Option<PathBuf>,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            min_age: 21,
            max_age: 100,
            start_year: 2015,
            end_year: 2024,
            buckets: 80,
            min_obs: 600,
            rate_min: -0.15,
            rate_max: 0.5,
            income_floor: 5.0,
            positive_income_floor: 5.0,
            bound_income_cutoff: 3000.0,
            param_floor: 1e-12,
            tolerance: 1e-15,
            max_iters: 15_000,
            lbfgs_mem: 7,
            convergence: ConvergencePolicy::Accept,
            normalize_buckets: false,
            parallel: true,
            output: None,
            export_cells: None,
        }
    }
}

impl EstimateConfig {
    pub fn age_count(&self) -> usize {
        (self.max_age - self.min_age + 1) as usize
    }

    pub fn year_count(&self) -> usize {
        (self.end_year - self.start_year + 1) as usize
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start_year..=self.end_year
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_age < self.min_age {
            return Err(AppError::new(
                2,
                format!("Invalid age range: min={} max={}.", self.min_age, self.max_age),
            ));
        }
        if self.end_year < self.start_year {
            return Err(AppError::new(
                2,
                format!(
                    "Invalid year range: start={} end={}.",
                    self.start_year, self.end_year
                ),
            ));
        }
        if self.buckets == 0 || self.buckets > self.age_count() {
            return Err(AppError::new(
                2,
                format!(
                    "Bucket count must be in [1, {}] (got {}).",
                    self.age_count(),
                    self.buckets
                ),
            ));
        }
        if !(self.rate_min.is_finite() && self.rate_max.is_finite() && self.rate_min < self.rate_max) {
            return Err(AppError::new(2, "Invalid rate filter bounds."));
        }
        if !(self.param_floor.is_finite() && self.param_floor > 0.0) {
            return Err(AppError::new(2, "Parameter floor must be finite and > 0."));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(AppError::new(2, "Tolerance must be finite and > 0."));
        }
        if self.max_iters == 0 {
            return Err(AppError::new(2, "max_iters must be >= 1."));
        }
        if self.lbfgs_mem == 0 {
            return Err(AppError::new(2, "L-BFGS memory must be >= 1."));
        }
        Ok(())
    }
}

/// A saved estimation result (JSON).
///
/// Parameter grids are indexed `[bucket][year]`; `null` marks an aggregate
/// that touched a missing age.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxFuncFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub min_age: u32,
    pub max_age: u32,
    pub start_year: i32,
    pub end_year: i32,
    pub buckets: usize,
    pub etr_params: Vec<Vec<Option<ParameterVector>>>,
    pub mtrx_params: Vec<Vec<Option<ParameterVector>>>,
    pub avg_income: Vec<f64>,
    pub total_population: Vec<f64>,
    pub elapsed_secs: f64,
}

impl TaxFuncFile {
    /// Parameters for `(bucket, year)`, if present.
    pub fn params(&self, target: Target, bucket: usize, year: i32) -> Option<ParameterVector> {
        if year < self.start_year {
            return None;
        }
        let t = (year - self.start_year) as usize;
        let grid = match target {
            Target::Etr => &self.etr_params,
            Target::Mtrx => &self.mtrx_params,
        };
        grid.get(bucket)?.get(t).copied().flatten()
    }
}
