//! Estimation pipeline for one year.
//!
//! Responsibilities:
//!
//! - per-cell weighted least squares on the ratio-of-polynomials surface
//! - age sweep with gap filling (interpolation / carry-forward)
//! - per-year summaries and population shares
//! - age-bucket aggregation of the finished grid

pub mod buckets;
pub mod fitter;
pub mod gaps;
pub mod objective;
pub mod optimizer;
pub mod year;

pub use buckets::*;
pub use fitter::*;
pub use gaps::*;
pub use optimizer::{FitOutcome, OptimOptions, OptimRun, Solver, minimize};
pub use year::*;
