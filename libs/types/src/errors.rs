//! Error types for identifier and bar validation

use thiserror::Error;

/// Errors raised while validating shared market data types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    /// ID value is null/zero when non-null required
    #[error("ID cannot be null/zero")]
    NullId,

    /// Timeframe code not present in the catalogue
    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    /// Bar prices violate low <= open/close <= high
    #[error("Inconsistent bar prices: {0}")]
    InconsistentPrices(String),
}
