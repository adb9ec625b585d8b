use surge_scalers::ScalerError;
use surge_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScaleError {
    /// Malformed trigger, unknown type or unresolvable credential. Not retried
    /// until the object changes.
    #[error("configuration error: {0}")]
    Config(String),

    /// The metric source could not be reached or timed out. Retried next tick.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    #[error("conflict writing {0} after retry")]
    ReconcileConflict(String),

    #[error("scale target not found: {0}")]
    TargetNotFound(String),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl From<ScalerError> for ScaleError {
    fn from(e: ScalerError) -> Self {
        match e {
            ScalerError::Config(_) | ScalerError::UnknownType(_) => Self::Config(e.to_string()),
            ScalerError::Backend(_) | ScalerError::Timeout(_) => Self::TransientBackend(e.to_string()),
        }
    }
}

impl ScaleError {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Condition reason recorded when this error stops a cycle.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "NoUsableTriggers",
            Self::TransientBackend(_) => "TransientBackendError",
            Self::ReconcileConflict(_) => "ReconcileConflict",
            Self::TargetNotFound(_) => "ScaleTargetNotFound",
            Self::State(_) => "StateError",
        }
    }
}

pub type ScaleResult<T> = Result<T, ScaleError>;
