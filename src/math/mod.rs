//! Numerical building blocks: the centered design matrix and bound transforms.

pub mod bounds;
pub mod design;

pub use bounds::*;
pub use design::*;
