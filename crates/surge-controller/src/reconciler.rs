//! One reconcile pass for one scaling object.
//!
//! Every step is idempotent, so a pass interrupted at any point (crash,
//! conflict, failed restore) is completed by the next one.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use surge_autoscale::{ScaleLoopManager, update_with_retry};
use surge_state::{
    Condition, ConditionKind, ConditionStatus, Orchestrator, ScalingObject, StateError,
};

use crate::error::{ControllerError, ControllerResult};
use crate::lifecycle::{FINALIZER, LifecyclePhase};

pub struct Reconciler {
    orchestrator: Arc<dyn Orchestrator>,
    loops: ScaleLoopManager,
}

impl Reconciler {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, loops: ScaleLoopManager) -> Self {
        Self {
            orchestrator,
            loops,
        }
    }

    pub fn loops(&self) -> &ScaleLoopManager {
        &self.loops
    }

    /// Reconcile the object stored under `key` and return its resulting phase.
    pub async fn reconcile(&self, key: &str) -> ControllerResult<LifecyclePhase> {
        let object = self.orchestrator.get_scaling_object(key).await?;
        let running = self.loops.is_running(key).await;
        let from = LifecyclePhase::observe(object.as_ref(), running);

        let to = match object {
            None => {
                if running {
                    self.loops.stop(key).await;
                }
                LifecyclePhase::Removed
            }
            Some(object) if object.is_deleting() => self.finalize(object).await?,
            Some(object) => self.ensure_active(object).await?,
        };

        transition(key, from, to);
        Ok(to)
    }

    /// Reconcile every stored object, and stop loops whose object is gone.
    pub async fn reconcile_all(&self) -> ControllerResult<Vec<(String, ControllerResult<LifecyclePhase>)>> {
        let objects = self.orchestrator.list_scaling_objects().await?;
        let mut keys: Vec<String> = objects.iter().map(ScalingObject::table_key).collect();
        for running in self.loops.active_loops().await {
            if !keys.contains(&running) {
                keys.push(running);
            }
        }

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let result = self.reconcile(&key).await;
            results.push((key, result));
        }
        Ok(results)
    }

    async fn ensure_active(&self, object: ScalingObject) -> ControllerResult<LifecyclePhase> {
        let key = object.table_key();

        // The finalizer must be persisted before any loop exists.
        let object = if object.has_finalizer(FINALIZER) {
            object
        } else {
            let written = update_with_retry(self.orchestrator.as_ref(), &key, |o| {
                if !o.has_finalizer(FINALIZER) {
                    o.meta.finalizers.push(FINALIZER.to_string());
                }
            })
            .await?;
            match written {
                Some(o) => {
                    debug!(object = %key, "finalizer added");
                    o
                }
                None => return Ok(LifecyclePhase::Removed),
            }
        };

        if let Err(reason) = validate(&object) {
            self.loops.stop(&key).await;
            self.mark_not_ready(&key, "InvalidSpec", &reason).await?;
            return Err(ControllerError::InvalidSpec { key, reason });
        }

        // No loop may touch the target before its original count is on record.
        let target = format!("{}/{}", object.target.kind, object.target.name);
        let Some(object) = self.capture_target(object).await? else {
            debug!(object = %key, %target, "scale target not found yet, loop not started");
            let message = format!("waiting for scale target {target}");
            self.mark_not_ready(&key, "ScaleTargetNotFound", &message).await?;
            return Ok(LifecyclePhase::FinalizingEntry);
        };
        self.loops.start(&object).await;
        Ok(LifecyclePhase::Active)
    }

    /// Record the original replica count and target kind the first time the
    /// target is seen. `None` while the target does not exist.
    async fn capture_target(&self, object: ScalingObject) -> ControllerResult<Option<ScalingObject>> {
        if object.status.original_replica_count.is_some()
            && object.status.scale_target_kind.is_some()
        {
            return Ok(Some(object));
        }

        let key = object.table_key();
        let replicas = match self
            .orchestrator
            .get_scale(&object.namespace, &object.target)
            .await
        {
            Ok(n) => n,
            Err(StateError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let kind = object.target.kind.clone();
        let written = update_with_retry(self.orchestrator.as_ref(), &key, |o| {
            if o.status.capture_original_replicas(replicas) {
                info!(object = %key, replicas, "captured original replica count");
            }
            o.status.scale_target_kind = Some(kind.clone());
        })
        .await?;
        Ok(Some(written.unwrap_or(object)))
    }

    async fn finalize(&self, object: ScalingObject) -> ControllerResult<LifecyclePhase> {
        let key = object.table_key();
        // Waits for the in-flight cycle, including scaler release.
        self.loops.stop(&key).await;

        if !object.has_finalizer(FINALIZER) {
            return Ok(LifecyclePhase::Removed);
        }

        if object.policy.restore_original_replica_count_on_delete {
            if let Some(original) = object.status.original_replica_count {
                match self
                    .orchestrator
                    .update_scale(&object.namespace, &object.target, original)
                    .await
                {
                    Ok(()) => info!(object = %key, replicas = original, "restored original replica count"),
                    Err(StateError::NotFound(_)) => {
                        debug!(object = %key, "scale target gone, nothing to restore")
                    }
                    Err(e) => {
                        error!(object = %key, error = %e, "restoring original replica count failed");
                        let reason = format!("restoring {original} replicas: {e}");
                        if let Err(write) = self.mark_not_ready(&key, "FinalizationFailed", &reason).await {
                            warn!(object = %key, error = %write, "recording finalization failure failed");
                        }
                        return Err(ControllerError::Finalization { key, reason });
                    }
                }
            }
        }

        update_with_retry(self.orchestrator.as_ref(), &key, |o| {
            o.meta.finalizers.retain(|f| f != FINALIZER);
        })
        .await?;
        info!(object = %key, "finalizer removed");
        Ok(LifecyclePhase::Removed)
    }

    /// Set `Ready=False` with `reason` on the stored object.
    async fn mark_not_ready(&self, key: &str, reason: &str, message: &str) -> ControllerResult<()> {
        let now = epoch_secs();
        update_with_retry(self.orchestrator.as_ref(), key, |o| {
            o.status.set_condition(Condition::new(
                ConditionKind::Ready,
                ConditionStatus::False,
                reason,
                message,
                now,
            ));
        })
        .await?;
        Ok(())
    }
}

/// Checks that must pass before a loop is started.
pub fn validate(object: &ScalingObject) -> Result<(), String> {
    if object.triggers.is_empty() {
        return Err("at least one trigger is required".to_string());
    }
    if let Some(i) = object
        .triggers
        .iter()
        .position(|t| t.trigger_type.trim().is_empty())
    {
        return Err(format!("trigger {i} has no type"));
    }
    if object.target.name.is_empty() {
        return Err("scale target name is required".to_string());
    }
    object.policy.validate()
}

fn transition(key: &str, from: LifecyclePhase, to: LifecyclePhase) {
    if from == to {
        return;
    }
    if !from.can_transition_to(to) {
        warn!(object = %key, ?from, ?to, "unexpected lifecycle transition");
    } else if to.is_terminal() {
        info!(object = %key, ?from, "scaling object released");
    } else {
        info!(object = %key, ?from, ?to, "lifecycle transition");
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
