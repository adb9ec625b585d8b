//! Optimistic-concurrency writes to scaling objects.

use tracing::debug;

use surge_state::{Orchestrator, ScalingObject};

use crate::error::{ScaleError, ScaleResult};

/// Fetch `key`, apply `mutate`, and write it back.
///
/// A version conflict triggers exactly one re-fetch and retry; a second
/// conflict is returned as [`ScaleError::ReconcileConflict`]. Returns
/// `Ok(None)` if the object no longer exists.
pub async fn update_with_retry<F>(
    orchestrator: &dyn Orchestrator,
    key: &str,
    mut mutate: F,
) -> ScaleResult<Option<ScalingObject>>
where
    F: FnMut(&mut ScalingObject) + Send,
{
    for attempt in 0..2 {
        let Some(mut object) = orchestrator.get_scaling_object(key).await? else {
            return Ok(None);
        };
        mutate(&mut object);
        match orchestrator.update_scaling_object(&object).await {
            Ok(written) => return Ok(Some(written)),
            Err(e) if e.is_conflict() && attempt == 0 => {
                debug!(object = %key, "write conflict, retrying with a fresh copy");
            }
            Err(e) if e.is_conflict() => break,
            Err(surge_state::StateError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
    Err(ScaleError::ReconcileConflict(key.to_string()))
}
