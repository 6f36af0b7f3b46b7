//! Microdata sources that are not files on disk.
//!
//! - `sample`: deterministic synthetic microdata (demos, tests, `txfunc simulate`)

pub mod sample;

pub use sample::*;
