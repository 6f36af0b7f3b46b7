//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - microdata records (`Observation`) and fit targets (`Target`)
//! - surface parameters (`ParameterVector`) and result cells (`Cell`)
//! - result grids (`AgeYearGrid`), run configuration, and the saved output file

pub mod types;

pub use types::*;
