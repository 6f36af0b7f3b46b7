//! Export per-(age, year) cells to CSV.
//!
//! One row per target, age and year, with the cell's provenance
//! (`estimated`, `interpolated`, `extrapolated`, `missing`) and its ten
//! parameters (empty for missing cells). Meant to be easy to consume in
//! spreadsheets or downstream scripts.

use std::path::Path;

use crate::domain::{AgeYearGrid, Cell, Target};
use crate::error::AppError;

const HEADER: [&str; 14] = [
    "target", "year", "age", "kind", "A", "B", "C", "D", "E", "F", "max_x", "min_x", "max_y", "min_y",
];

/// Write both targets' cell grids to one CSV file.
pub fn write_cells_csv(
    path: &Path,
    etr: &AgeYearGrid<Cell>,
    mtrx: &AgeYearGrid<Cell>,
    min_age: u32,
    start_year: i32,
) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let write_err = |e: csv::Error| AppError::new(2, format!("Failed to write export CSV row: {e}"));

    writer.write_record(HEADER).map_err(write_err)?;

    for (target, grid) in [(Target::Etr, etr), (Target::Mtrx, mtrx)] {
        for t in 0..grid.years() {
            for row in 0..grid.rows() {
                let Some(cell) = grid.get(row, t) else {
                    continue;
                };
                let mut record = vec![
                    target.display_name().to_string(),
                    (start_year + t as i32).to_string(),
                    (min_age + row as u32).to_string(),
                    cell.kind_name().to_string(),
                ];
                match cell.params() {
                    Some(p) => record.extend(p.as_slice().iter().map(|v| format!("{v:.12e}"))),
                    None => record.extend(std::iter::repeat_n(String::new(), 10)),
                }
                writer.write_record(&record).map_err(write_err)?;
            }
        }
    }

    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush export CSV '{}': {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NUM_PARAMS, ParameterVector};

    #[test]
    fn writes_one_row_per_target_age_year() {
        let cells = vec![Cell::Estimated(ParameterVector::new([0.5; NUM_PARAMS])), Cell::Missing];
        let grid = AgeYearGrid::from_year_columns(2, vec![cells]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.csv");

        write_cells_csv(&path, &grid, &grid, 30, 2018).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(&rows[0][0], "ETR");
        assert_eq!(&rows[0][1], "2018");
        assert_eq!(&rows[0][2], "30");
        assert_eq!(&rows[0][3], "estimated");
        assert!((rows[0][4].parse::<f64>().unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(&rows[1][3], "missing");
        assert_eq!(&rows[1][4], "");
        assert_eq!(&rows[3][0], "MTRx");
    }
}
