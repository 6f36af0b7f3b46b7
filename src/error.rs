//! Error types.
//!
//! `AppError` is the user-facing error carried up to `main` (message + process
//! exit code). Estimation internals use the richer `FitError`, which converts
//! into `AppError` at the year-driver boundary.
//!
//! Exit codes:
//! - 2: invalid input, configuration, or IO
//! - 3: insufficient data
//! - 4: numerical / optimizer failure

use thiserror::Error;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Failures of a single (age, year) cell fit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Too few usable rows to identify the surface.
    #[error("insufficient data: {found} usable observations, need at least {required}")]
    InsufficientData { found: usize, required: usize },

    /// A design-matrix column mean or an input value was not finite / not positive.
    #[error("non-finite or degenerate input: {what}")]
    NonFinite { what: String },

    /// The optimizer itself errored (line search breakdown, invalid setting, ...).
    #[error("optimizer error: {0}")]
    Optimizer(String),

    /// The optimizer stopped without meeting its convergence criterion and the
    /// run was configured to reject such fits.
    #[error("fit did not converge after {iterations} iterations: {reason}")]
    DidNotConverge { iterations: u64, reason: String },
}

impl From<argmin::core::Error> for FitError {
    fn from(value: argmin::core::Error) -> Self {
        FitError::Optimizer(value.to_string())
    }
}

impl From<FitError> for AppError {
    fn from(value: FitError) -> Self {
        let code = match value {
            FitError::InsufficientData { .. } => 3,
            FitError::NonFinite { .. } | FitError::Optimizer(_) | FitError::DidNotConverge { .. } => 4,
        };
        AppError::new(code, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_errors_map_to_exit_codes() {
        let e: AppError = FitError::InsufficientData { found: 3, required: 10 }.into();
        assert_eq!(e.exit_code(), 3);
        assert!(e.message().contains("3 usable"));

        let e: AppError = FitError::DidNotConverge {
            iterations: 15,
            reason: "MaxItersReached".to_string(),
        }
        .into();
        assert_eq!(e.exit_code(), 4);
    }
}
