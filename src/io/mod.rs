//! Input/output helpers.
//!
//! - raw microdata CSV ingest (`ingest`)
//! - per-cell CSV export (`export`)
//! - tax-function JSON read/write (`taxfunc`)

pub mod export;
pub mod ingest;
pub mod taxfunc;

pub use export::*;
pub use ingest::*;
pub use taxfunc::*;
