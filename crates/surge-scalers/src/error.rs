//! Scaler error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for scaler operations.
pub type ScalerResult<T> = Result<T, ScalerError>;

/// Errors raised while constructing or querying a scaler.
#[derive(Debug, Clone, Error)]
pub enum ScalerError {
    /// Malformed or missing trigger metadata. Not retried until the trigger changes.
    #[error("invalid trigger configuration: {0}")]
    Config(String),

    #[error("unknown trigger type: {0}")]
    UnknownType(String),

    /// The metric source could not be reached or answered with an error.
    #[error("metric source error: {0}")]
    Backend(String),

    #[error("metric source timed out after {0:?}")]
    Timeout(Duration),
}

impl ScalerError {
    /// Whether the failure is a configuration problem rather than a transient one.
    pub fn is_config(&self) -> bool {
        matches!(self, ScalerError::Config(_) | ScalerError::UnknownType(_))
    }
}
