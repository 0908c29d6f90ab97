//! Error types for the indicator engine

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Rolling window capacity must be non-zero")]
    ZeroCapacity,
}

/// Failure of a single calculator on a single bar
///
/// Captured by the engine dispatcher; never aborts other calculators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalculatorError {
    #[error("Non-finite value for {metric}: {value}")]
    NonFinite { metric: &'static str, value: f64 },

    #[error("Arithmetic error computing {metric}: {message}")]
    Arithmetic {
        metric: &'static str,
        message: String,
    },

    #[error("Overflow accumulating {metric}")]
    Overflow { metric: &'static str },
}

pub type Result<T> = std::result::Result<T, CalculatorError>;
