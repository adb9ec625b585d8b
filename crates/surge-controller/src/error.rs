use surge_autoscale::ScaleError;
use surge_state::StateError;
use thiserror::Error;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cleanup during deletion failed; the finalizer stays in place.
    #[error("finalizing {key}: {reason}")]
    Finalization { key: String, reason: String },

    #[error("invalid scaling object {key}: {reason}")]
    InvalidSpec { key: String, reason: String },

    #[error("conflict writing {0} after retry")]
    ReconcileConflict(String),

    #[error("autoscale error: {0}")]
    Scale(ScaleError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl From<ScaleError> for ControllerError {
    fn from(e: ScaleError) -> Self {
        match e {
            ScaleError::ReconcileConflict(key) => Self::ReconcileConflict(key),
            ScaleError::State(e) => Self::State(e),
            other => Self::Scale(other),
        }
    }
}
