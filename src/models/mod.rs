//! Tax-rate surface implementations.
//!
//! Surfaces are small, pure functions of `(x, y, params)` so that fitting and
//! downstream evaluation share one definition.

pub mod tax_rate;

pub use tax_rate::*;
