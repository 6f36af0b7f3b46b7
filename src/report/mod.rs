//! Reporting utilities: run summaries, elapsed time and point evaluations.

pub mod format;

pub use format::*;
