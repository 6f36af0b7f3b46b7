//! Per-year gap filling across ages.
//!
//! Ages are visited in increasing order over the observed range. An age
//! either yields a direct estimate or is a no-data age. Runs of no-data ages
//! are resolved as follows:
//!
//! - leading run (no earlier estimate this year): copy the first estimate
//!   backward, down to the configured minimum age
//! - interior run: linear interpolation between the estimates on either side,
//!   at `k / (n + 1)` for the `k`-th of `n` missing ages
//! - trailing run: copy the last estimate forward to the configured maximum
//!
//! Ages above the observed range are filled forward from the last estimate.
//! A year without any estimate stays entirely `Missing`.

use log::warn;

use crate::domain::{Cell, ParameterVector, Target};
use crate::error::AppError;

/// One estimate per target, indexed by [`Target::index`].
pub type TargetPair = [ParameterVector; 2];

/// Cell kinds counted over one year's ages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellCounts {
    pub estimated: usize,
    pub interpolated: usize,
    pub extrapolated: usize,
    pub missing: usize,
}

/// Filled cells of one year, one column per target.
#[derive(Debug, Clone, PartialEq)]
pub struct GapFill {
    cells: [Vec<Cell>; 2],
}

impl GapFill {
    fn missing(age_count: usize) -> Self {
        Self {
            cells: [vec![Cell::Missing; age_count], vec![Cell::Missing; age_count]],
        }
    }

    pub fn cells(&self, target: Target) -> &[Cell] {
        &self.cells[target.index()]
    }

    pub fn into_cells(self) -> [Vec<Cell>; 2] {
        self.cells
    }

    /// Both targets share cell kinds, so ETR is counted.
    pub fn counts(&self) -> CellCounts {
        let mut counts = CellCounts::default();
        for cell in &self.cells[0] {
            match cell {
                Cell::Missing => counts.missing += 1,
                Cell::Estimated(_) => counts.estimated += 1,
                Cell::Interpolated(_) => counts.interpolated += 1,
                Cell::Extrapolated(_) => counts.extrapolated += 1,
            }
        }
        counts
    }

    fn put(&mut self, idx: usize, pair: &TargetPair, make: fn(ParameterVector) -> Cell) {
        for (col, p) in self.cells.iter_mut().zip(pair) {
            col[idx] = make(*p);
        }
    }

    fn put_lerp(&mut self, idx: usize, from: &TargetPair, to: &TargetPair, t: f64) {
        for (k, col) in self.cells.iter_mut().enumerate() {
            col[idx] = Cell::Interpolated(from[k].lerp(&to[k], t));
        }
    }
}

/// Run the age sweep for one year.
///
/// `observed` is the observed age range already clamped to
/// `[min_age, max_age]`; `None` means the year has no usable ages.
/// `estimate` is called once per observed age, in increasing order, and
/// returns `None` for a no-data age.
pub fn fill_year<F>(
    min_age: u32,
    max_age: u32,
    observed: Option<(u32, u32)>,
    mut estimate: F,
) -> Result<GapFill, AppError>
where
    F: FnMut(u32) -> Result<Option<TargetPair>, AppError>,
{
    let age_count = (max_age - min_age + 1) as usize;
    let mut out = GapFill::missing(age_count);
    let Some((lo, hi)) = observed else {
        return Ok(out);
    };

    let mut last_good: Option<TargetPair> = None;
    let mut gap_len = 0usize;

    for age in lo..=hi {
        let idx = (age - min_age) as usize;
        match estimate(age)? {
            Some(pair) => {
                out.put(idx, &pair, Cell::Estimated);
                match &last_good {
                    None => {
                        for j in 0..idx {
                            out.put(j, &pair, Cell::Extrapolated);
                        }
                    }
                    Some(prev) if gap_len > 0 => {
                        let start = idx - gap_len;
                        for k in 1..=gap_len {
                            let t = k as f64 / (gap_len + 1) as f64;
                            out.put_lerp(start + k - 1, prev, &pair, t);
                        }
                    }
                    Some(_) => {}
                }
                gap_len = 0;
                if age == hi {
                    for j in idx + 1..age_count {
                        out.put(j, &pair, Cell::Extrapolated);
                    }
                }
                last_good = Some(pair);
            }
            None => {
                gap_len += 1;
                if age == hi {
                    match &last_good {
                        Some(prev) => {
                            for j in idx + 1 - gap_len..age_count {
                                out.put(j, prev, Cell::Extrapolated);
                            }
                        }
                        None => warn!("no age in [{lo}, {hi}] had enough data; year left missing"),
                    }
                }
            }
        }
    }

    Ok(out)
}
