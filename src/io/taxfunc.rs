//! Read/write tax-function JSON files.
//!
//! The file is the portable result of an estimation run: bucketed ETR and
//! MTRx parameters per year, per-year average income and population, and the
//! elapsed time. The schema is defined by `domain::TaxFuncFile`.

use std::fs::File;
use std::path::Path;

use crate::domain::TaxFuncFile;
use crate::error::AppError;

/// Write a tax-function JSON file.
pub fn write_taxfunc_json(path: &Path, file: &TaxFuncFile) -> Result<(), AppError> {
    let out = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create tax-function JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(out, file)
        .map_err(|e| AppError::new(2, format!("Failed to write tax-function JSON: {e}")))?;
    Ok(())
}

/// Read a tax-function JSON file.
pub fn read_taxfunc_json(path: &Path) -> Result<TaxFuncFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open tax-function JSON '{}': {e}", path.display())))?;
    let parsed: TaxFuncFile =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid tax-function JSON: {e}")))?;

    let years = (parsed.end_year - parsed.start_year + 1).max(0) as usize;
    let shape_ok = |grid: &Vec<Vec<_>>| grid.len() == parsed.buckets && grid.iter().all(|row| row.len() == years);
    if !shape_ok(&parsed.etr_params) || !shape_ok(&parsed.mtrx_params) {
        return Err(AppError::new(
            2,
            format!(
                "Tax-function JSON '{}' does not match its declared {} buckets x {years} years.",
                path.display(),
                parsed.buckets
            ),
        ));
    }
    Ok(parsed)
}
