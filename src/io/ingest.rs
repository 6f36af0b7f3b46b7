//! CSV microdata ingest.
//!
//! One file per year, named `{year}_tau_n.csv`, with the raw tax-calculator
//! columns. Each row is turned into an `Observation`:
//!
//! - labor income = wages and salaries + self-employed income
//! - capital income = adjusted total income − labor income
//! - effective rate = total tax liability / adjusted total income
//! - labor marginal rate = wage and self-employed MTRs mixed by income share
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Separation of concerns**: no filtering or fitting logic here

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::domain::Observation;
use crate::error::AppError;

pub const COL_AGE: &str = "Age";
pub const COL_WAGES: &str = "Wage and Salaries";
pub const COL_SELF_EMPLOYED: &str = "Self-Employed Income";
pub const COL_TAX: &str = "Total Tax Liability";
pub const COL_ATI: &str = "Adjusted Total income";
pub const COL_MTR_WAGE: &str = "MTR wage";
pub const COL_MTR_SE: &str = "MTR self-employed Wage";
pub const COL_WEIGHTS: &str = "Weights";

const REQUIRED: [&str; 8] = [
    COL_AGE,
    COL_WAGES,
    COL_SELF_EMPLOYED,
    COL_TAX,
    COL_ATI,
    COL_MTR_WAGE,
    COL_MTR_SE,
    COL_WEIGHTS,
];

/// Anything that can hand the year driver one year of microdata.
pub trait MicrodataSource: Sync {
    fn load_year(&self, year: i32) -> Result<Vec<Observation>, AppError>;
}

/// One row in the raw per-year schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "Age")]
    pub age: u32,
    #[serde(rename = "Wage and Salaries")]
    pub wages: f64,
    #[serde(rename = "Self-Employed Income")]
    pub self_employed: f64,
    #[serde(rename = "Total Tax Liability")]
    pub tax_liability: f64,
    #[serde(rename = "Adjusted Total income")]
    pub adjusted_total_income: f64,
    #[serde(rename = "MTR wage")]
    pub mtr_wage: f64,
    #[serde(rename = "MTR self-employed Wage")]
    pub mtr_self_employed: f64,
    #[serde(rename = "Weights")]
    pub weight: f64,
}

impl RawRecord {
    /// Derived incomes and rates.
    pub fn to_observation(&self) -> Observation {
        let labor = self.wages + self.self_employed;
        let labor_marginal_rate = if labor == 0.0 {
            self.mtr_wage
        } else {
            self.mtr_wage * (self.wages / labor) + self.mtr_self_employed * (self.self_employed / labor)
        };
        Observation {
            age: self.age,
            labor_income: labor,
            capital_income: self.adjusted_total_income - labor,
            adjusted_total_income: self.adjusted_total_income,
            effective_rate: self.tax_liability / self.adjusted_total_income,
            labor_marginal_rate,
            weight: self.weight,
        }
    }
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Parsed rows of one file plus what was skipped.
#[derive(Debug, Clone)]
pub struct LoadedMicrodata {
    pub records: Vec<RawRecord>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Load one raw microdata CSV.
pub fn load_raw_csv(path: &Path) -> Result<LoadedMicrodata, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open microdata CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers in '{}': {e}", path.display())))?
        .clone();
    let header_map = build_header_map(&headers);
    ensure_required_columns_exist(&header_map, path)?;

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Data starts on line 2 (1-based, after the header).
        let line = idx + 2;
        rows_read += 1;

        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| parse_row(&record, &header_map));
        match parsed {
            Ok(r) => records.push(r),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        warn!(
            "{}: skipped {} of {} rows (first: line {}: {})",
            path.display(),
            row_errors.len(),
            rows_read,
            row_errors[0].line,
            row_errors[0].message
        );
    }

    Ok(LoadedMicrodata {
        records,
        row_errors,
        rows_read,
    })
}

/// Write records in the raw schema (used by `txfunc simulate`).
pub fn write_raw_csv(path: &Path, records: &[RawRecord]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create microdata CSV '{}': {e}", path.display())))?;
    for r in records {
        writer
            .serialize(r)
            .map_err(|e| AppError::new(2, format!("Failed to write microdata row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush microdata CSV '{}': {e}", path.display())))?;
    Ok(())
}

/// Per-year CSV files in one directory.
#[derive(Debug, Clone)]
pub struct CsvMicrodataSource {
    dir: PathBuf,
}

impl CsvMicrodataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for_year(&self, year: i32) -> PathBuf {
        self.dir.join(year_file_name(year))
    }
}

impl MicrodataSource for CsvMicrodataSource {
    fn load_year(&self, year: i32) -> Result<Vec<Observation>, AppError> {
        let path = self.path_for_year(year);
        let loaded = load_raw_csv(&path)?;
        debug!("{}: {} rows read, {} used", path.display(), loaded.rows_read, loaded.records.len());
        Ok(loaded.records.iter().map(RawRecord::to_observation).collect())
    }
}

pub fn year_file_name(year: i32) -> String {
    format!("{year}_tau_n.csv")
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_required_columns_exist(header_map: &HashMap<String, usize>, path: &Path) -> Result<(), AppError> {
    let missing: Vec<&str> = REQUIRED
        .iter()
        .copied()
        .filter(|c| !header_map.contains_key(&normalize_header_name(c)))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(AppError::new(
        2,
        format!("'{}' is missing required columns: {}", path.display(), missing.join(", ")),
    ))
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<RawRecord, String> {
    let age_raw = get_required(record, header_map, COL_AGE)?;
    // Ages are sometimes written as floats ("45.0").
    let age_f = parse_f64(age_raw, COL_AGE)?;
    if age_f < 0.0 || age_f.fract() != 0.0 {
        return Err(format!("Invalid age: `{age_raw}`"));
    }

    let weight = parse_f64(get_required(record, header_map, COL_WEIGHTS)?, COL_WEIGHTS)?;
    if weight <= 0.0 {
        return Err(format!("Weight must be > 0 (got {weight})"));
    }

    Ok(RawRecord {
        age: age_f as u32,
        wages: parse_f64(get_required(record, header_map, COL_WAGES)?, COL_WAGES)?,
        self_employed: parse_f64(get_required(record, header_map, COL_SELF_EMPLOYED)?, COL_SELF_EMPLOYED)?,
        tax_liability: parse_f64(get_required(record, header_map, COL_TAX)?, COL_TAX)?,
        adjusted_total_income: parse_f64(get_required(record, header_map, COL_ATI)?, COL_ATI)?,
        mtr_wage: parse_f64(get_required(record, header_map, COL_MTR_WAGE)?, COL_MTR_WAGE)?,
        mtr_self_employed: parse_f64(get_required(record, header_map, COL_MTR_SE)?, COL_MTR_SE)?,
        weight,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(&normalize_header_name(name))
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    let v = s
        .parse::<f64>()
        .map_err(|_| format!("Invalid number in `{name}`: `{s}`"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("Non-finite value in `{name}`: `{s}`"))
    }
}
