//! `taxfunc` library crate.
//!
//! The binary (`txfunc`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fitted surfaces can be evaluated by downstream crates
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
