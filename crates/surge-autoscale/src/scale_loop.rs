//! Scale loops — one background task per scaling object.
//!
//! The [`ScaleLoopManager`] spawns a [`ScaleLoop`] per object and stops it
//! cooperatively: a stop request is only observed between ticks, and
//! [`ScaleLoopManager::stop`] waits for the task to exit, so a returned stop
//! means every scaler of the last cycle has been released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use surge_state::{
    Condition, ConditionKind, ConditionStatus, Orchestrator, ScalingObject, ScalingStatus,
    StateError, TriggerHealthState,
};

use crate::decision::desired_replicas;
use crate::error::{ScaleError, ScaleResult};
use crate::handler::{CycleOutcome, ScaleHandler, TriggerOutcome};
use crate::status::update_with_retry;

/// What one tick observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Live replica count read at the start of the tick.
    pub current: u32,
    /// `None` when every trigger failed and the count was held.
    pub desired: Option<u32>,
    /// Replica count written to the orchestrator, if any.
    pub applied: Option<u32>,
    /// A scale-down was computed but held back by the cooldown.
    pub held_by_cooldown: bool,
}

/// The periodic driver for one scaling object.
///
/// Works from the object snapshot it was created with; spec changes are picked
/// up when the reconciler replaces the loop.
pub struct ScaleLoop {
    object: ScalingObject,
    handler: Arc<ScaleHandler>,
    last_scale_down: Option<Instant>,
}

impl ScaleLoop {
    pub fn new(object: ScalingObject, handler: Arc<ScaleHandler>) -> Self {
        Self {
            object,
            handler,
            last_scale_down: None,
        }
    }

    fn orchestrator(&self) -> &dyn Orchestrator {
        self.handler.orchestrator().as_ref()
    }

    /// Run one complete tick: measure, decide, apply, record status.
    pub async fn tick(&mut self) -> ScaleResult<TickReport> {
        let key = self.object.table_key();
        let ns = &self.object.namespace;
        let target = &self.object.target;

        let current = match self.orchestrator().get_scale(ns, target).await {
            Ok(n) => n,
            Err(StateError::NotFound(what)) => {
                let err = ScaleError::TargetNotFound(what);
                self.record_failure(&err).await;
                return Err(err);
            }
            Err(e) => {
                let err = ScaleError::from(e);
                self.record_failure(&err).await;
                return Err(err);
            }
        };

        let outcome = match self.handler.run_cycle(&self.object).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record_failure(&e).await;
                return Err(e);
            }
        };

        let mut report = TickReport {
            current,
            desired: None,
            applied: None,
            held_by_cooldown: false,
        };

        let mut write_failure = None;
        if let Some(decision) = &outcome.decision {
            let desired = desired_replicas(current, decision, &self.object.policy);
            report.desired = Some(desired);

            if desired != current {
                let cooldown = self.object.policy.cooldown_period();
                let scaling_down = desired < current;
                let cooling = scaling_down
                    && self
                        .last_scale_down
                        .is_some_and(|at| at.elapsed() < cooldown);

                if cooling {
                    debug!(object = %key, from = current, to = desired, "scale-down held by cooldown");
                    report.held_by_cooldown = true;
                } else {
                    match self.orchestrator().update_scale(ns, target, desired).await {
                        Ok(()) => {
                            if scaling_down {
                                self.last_scale_down = Some(Instant::now());
                            }
                            report.applied = Some(desired);
                            info!(object = %key, from = current, to = desired, "scaled target");
                        }
                        Err(e) => write_failure = Some(ScaleError::from(e)),
                    }
                }
            }
        } else {
            warn!(object = %key, replicas = current, "all triggers failed, holding replica count");
        }

        self.record_cycle(&outcome, &report, write_failure.as_ref()).await;
        match write_failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Tick until `shutdown` fires. The first tick runs immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let key = self.object.table_key();
        let interval = self.object.policy.polling_interval();
        debug!(object = %key, ?interval, "scale loop starting");

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                error!(object = %key, error = %e, "scale cycle failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(object = %key, "scale loop stopped");
    }

    async fn record_cycle(
        &self,
        outcome: &CycleOutcome,
        report: &TickReport,
        write_failure: Option<&ScaleError>,
    ) {
        let now = epoch_secs();
        let names: Vec<String> = (0..self.object.triggers.len())
            .map(|i| self.object.trigger_name(i))
            .collect();

        let mutate = |object: &mut ScalingObject| {
            let status = &mut object.status;
            status.retain_triggers(&names);
            for t in &outcome.triggers {
                apply_trigger_report(status, &t.name, &t.outcome, now);
            }

            match &outcome.decision {
                Some(decision) => {
                    status.desired_replicas = report.desired;
                    if decision.is_active {
                        status.last_active_time = Some(now);
                    }
                    let (active, reason, message) = if decision.is_active {
                        (ConditionStatus::True, "ScalerActive", "at least one trigger is active")
                    } else {
                        (ConditionStatus::False, "ScalerNotActive", "no trigger is active")
                    };
                    status.set_condition(Condition::new(ConditionKind::Active, active, reason, message, now));
                    let measured = outcome
                        .triggers
                        .iter()
                        .filter(|t| matches!(t.outcome, TriggerOutcome::Measured { .. }))
                        .count();
                    status.set_condition(Condition::new(
                        ConditionKind::Ready,
                        ConditionStatus::True,
                        "ScalerReady",
                        format!("{measured} of {} triggers measured", outcome.triggers.len()),
                        now,
                    ));
                }
                None => status.set_condition(Condition::new(
                    ConditionKind::Ready,
                    ConditionStatus::False,
                    "AllTriggersFailed",
                    format!("no trigger measured; holding {} replicas", report.current),
                    now,
                )),
            }
            if let (Some(err), Some(desired)) = (write_failure, report.desired) {
                status.set_condition(Condition::new(
                    ConditionKind::Ready,
                    ConditionStatus::False,
                    "ScaleUpdateFailed",
                    format!("scaling {} -> {desired} failed: {err}", report.current),
                    now,
                ));
            }
            if report.applied.is_some() {
                status.last_scale_time = Some(now);
            }
        };
        self.write_status(mutate).await;
    }

    async fn record_failure(&self, err: &ScaleError) {
        let now = epoch_secs();
        let message = err.to_string();
        let is_target_missing = matches!(err, ScaleError::TargetNotFound(_));
        self.write_status(|object: &mut ScalingObject| {
            object.status.set_condition(Condition::new(
                ConditionKind::Ready,
                ConditionStatus::False,
                err.reason(),
                message.clone(),
                now,
            ));
            if is_target_missing {
                object.status.set_condition(Condition::new(
                    ConditionKind::Active,
                    ConditionStatus::Unknown,
                    err.reason(),
                    message.clone(),
                    now,
                ));
            }
        })
        .await;
    }

    async fn write_status<F>(&self, mutate: F)
    where
        F: FnMut(&mut ScalingObject) + Send,
    {
        let key = self.object.table_key();
        match update_with_retry(self.orchestrator(), &key, mutate).await {
            Ok(Some(_)) => {}
            Ok(None) => debug!(object = %key, "object gone, status not written"),
            Err(ScaleError::ReconcileConflict(_)) => {
                warn!(object = %key, "status write conflicted twice, deferring to next tick")
            }
            Err(e) => warn!(object = %key, error = %e, "status write failed"),
        }
    }
}

fn apply_trigger_report(status: &mut ScalingStatus, name: &str, outcome: &TriggerOutcome, now: u64) {
    let health = status.trigger_health.entry(name.to_string()).or_default();
    let condition = match outcome {
        TriggerOutcome::Measured { active } => {
            health.state = TriggerHealthState::Happy;
            health.consecutive_failures = 0;
            Condition::new(
                ConditionKind::TriggerReady,
                ConditionStatus::True,
                if *active { "TriggerActive" } else { "TriggerIdle" },
                "measured",
                now,
            )
        }
        TriggerOutcome::ConfigInvalid(e) => {
            health.state = TriggerHealthState::Failing;
            health.consecutive_failures += 1;
            Condition::new(
                ConditionKind::TriggerReady,
                ConditionStatus::False,
                "InvalidTriggerConfig",
                e.clone(),
                now,
            )
        }
        TriggerOutcome::MeasureFailed(e) => {
            health.state = TriggerHealthState::Failing;
            health.consecutive_failures += 1;
            Condition::new(
                ConditionKind::TriggerReady,
                ConditionStatus::False,
                "MeasurementFailed",
                e.clone(),
                now,
            )
        }
    };
    status.set_condition(condition.for_trigger(name));
}

struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    generation: u64,
}

/// Owns the running scale loops, keyed by `{namespace}/{name}`.
#[derive(Clone)]
pub struct ScaleLoopManager {
    handler: Arc<ScaleHandler>,
    loops: Arc<RwLock<HashMap<String, LoopSlot>>>,
}

impl ScaleLoopManager {
    pub fn new(handler: Arc<ScaleHandler>) -> Self {
        Self {
            handler,
            loops: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a loop for `object`, replacing one started for an older
    /// generation. Returns `false` if a loop for this generation is already
    /// running.
    pub async fn start(&self, object: &ScalingObject) -> bool {
        let key = object.table_key();
        let generation = object.meta.generation;

        let old = {
            let mut loops = self.loops.write().await;
            if let Some(slot) = loops.get(&key) {
                if slot.generation == generation && !slot.handle.is_finished() {
                    return false;
                }
            }
            loops.remove(&key)
        };
        // The old loop may be mid-cycle; wait for it without holding the map.
        if let Some(old) = old {
            shutdown_slot(&key, old).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scale_loop = ScaleLoop::new(object.clone(), self.handler.clone());
        let handle = tokio::spawn(scale_loop.run(shutdown_rx));
        let displaced = self.loops.write().await.insert(
            key.clone(),
            LoopSlot {
                handle,
                shutdown_tx,
                generation,
            },
        );
        if let Some(displaced) = displaced {
            shutdown_slot(&key, displaced).await;
        }
        info!(object = %key, generation, "scale loop started");
        true
    }

    /// Stop the loop for `key` and wait for its in-flight cycle to finish.
    pub async fn stop(&self, key: &str) -> bool {
        let slot = self.loops.write().await.remove(key);
        match slot {
            Some(slot) => {
                shutdown_slot(key, slot).await;
                info!(object = %key, "scale loop stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every loop (for graceful shutdown).
    pub async fn stop_all(&self) {
        let slots: Vec<(String, LoopSlot)> = self.loops.write().await.drain().collect();
        for (key, slot) in slots {
            shutdown_slot(&key, slot).await;
        }
        info!("all scale loops stopped");
    }

    pub async fn is_running(&self, key: &str) -> bool {
        self.loops.read().await.contains_key(key)
    }

    /// Generation of the object the running loop was started for.
    pub async fn generation(&self, key: &str) -> Option<u64> {
        self.loops.read().await.get(key).map(|s| s.generation)
    }

    pub async fn active_loops(&self) -> Vec<String> {
        self.loops.read().await.keys().cloned().collect()
    }
}

async fn shutdown_slot(key: &str, slot: LoopSlot) {
    let _ = slot.shutdown_tx.send(true);
    if let Err(e) = slot.handle.await {
        error!(object = %key, error = %e, "scale loop task ended abnormally");
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerConfig;
    use crate::testing::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use surge_state::StateStore;

    fn loop_over(
        store: &StateStore,
        counters: &StubCounters,
        flaky: Arc<FlakyOrchestrator>,
        object: ScalingObject,
    ) -> ScaleLoop {
        let handler = ScaleHandler::new(
            flaky,
            Arc::new(store.clone()),
            Arc::new(counters.registry()),
            HandlerConfig::default(),
        );
        ScaleLoop::new(object, Arc::new(handler))
    }

    fn create(store: &StateStore, object: ScalingObject) -> ScalingObject {
        store.create_scaling_object(&object).unwrap()
    }

    #[tokio::test]
    async fn scale_to_zero_then_up_then_down() {
        let (store, counters) = fixture(0);
        let mut object = scaling_object(vec![stub_trigger(&[])], 0, 4);
        object.policy.cooldown_period_secs = Some(0);
        let object = create(&store, object);
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        let mut scale_loop = loop_over(&store, &counters, flaky, object.clone());

        let mut desired = Vec::new();
        for (value, active) in [(0.0, false), (2.0, true), (0.0, false)] {
            counters.push(value, active);
            desired.push(scale_loop.tick().await.unwrap().desired.unwrap());
        }
        assert_eq!(desired, vec![0, 2, 0]);
        assert_eq!(store.get_workload("default", "Deployment", "worker").unwrap().unwrap().replicas, 0);

        let status = store.get_scaling_object(&object.table_key()).unwrap().unwrap().status;
        assert_eq!(status.desired_replicas, Some(0));
        assert!(status.last_active_time.is_some());
        assert!(status.last_scale_time.is_some());
        assert_eq!(
            status.condition(ConditionKind::Active, None).unwrap().status,
            ConditionStatus::False
        );
    }

    #[tokio::test]
    async fn scale_downs_inside_cooldown_apply_once() {
        let (store, counters) = fixture(10);
        let mut object = scaling_object(vec![stub_trigger(&[])], 1, 20);
        object.policy.cooldown_period_secs = Some(300);
        let object = create(&store, object);
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        let mut scale_loop = loop_over(&store, &counters, flaky.clone(), object);

        counters.push(5.0, true);
        let first = scale_loop.tick().await.unwrap();
        assert_eq!(first.applied, Some(5));

        counters.push(2.0, true);
        let second = scale_loop.tick().await.unwrap();
        assert_eq!(second.desired, Some(2));
        assert!(second.held_by_cooldown);
        assert_eq!(second.applied, None);
        assert_eq!(flaky.scale_updates.load(Ordering::SeqCst), 1);

        // Scale-ups are never gated.
        counters.push(12.0, true);
        let third = scale_loop.tick().await.unwrap();
        assert_eq!(third.applied, Some(12));
        assert_eq!(flaky.scale_updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_trigger_is_excluded_from_decision() {
        let (store, counters) = fixture(10);
        let object = create(
            &store,
            scaling_object(
                vec![stub_trigger(&[("value", "4")]), stub_trigger(&[("fail", "true")])],
                0,
                20,
            ),
        );
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        let mut scale_loop = loop_over(&store, &counters, flaky, object.clone());

        let report = scale_loop.tick().await.unwrap();
        assert_eq!(report.desired, Some(4));
        assert_eq!(report.applied, Some(4));

        let status = store.get_scaling_object(&object.table_key()).unwrap().unwrap().status;
        let failing = &status.trigger_health["stub-1"];
        assert_eq!(failing.state, TriggerHealthState::Failing);
        assert_eq!(failing.consecutive_failures, 1);
        assert_eq!(
            status.condition(ConditionKind::TriggerReady, Some("stub-1")).unwrap().reason,
            "MeasurementFailed"
        );
        assert_eq!(status.trigger_health["stub-0"].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn total_failure_holds_replicas() {
        let (store, counters) = fixture(3);
        let object = create(&store, scaling_object(vec![stub_trigger(&[("fail", "true")])], 0, 10));
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        let mut scale_loop = loop_over(&store, &counters, flaky.clone(), object.clone());

        let report = scale_loop.tick().await.unwrap();
        assert_eq!(report.desired, None);
        assert_eq!(flaky.scale_updates.load(Ordering::SeqCst), 0);

        let status = store.get_scaling_object(&object.table_key()).unwrap().unwrap().status;
        let ready = status.condition(ConditionKind::Ready, None).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "AllTriggersFailed");
    }

    #[tokio::test]
    async fn bounds_are_respected() {
        let (store, counters) = fixture(3);
        let object = create(&store, scaling_object(vec![stub_trigger(&[("value", "500")])], 2, 6));
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        let mut scale_loop = loop_over(&store, &counters, flaky, object);
        assert_eq!(scale_loop.tick().await.unwrap().desired, Some(6));
    }

    #[tokio::test]
    async fn repeated_status_conflicts_are_not_fatal() {
        let (store, counters) = fixture(1);
        let object = create(&store, scaling_object(vec![stub_trigger(&[("value", "3")])], 0, 10));
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 2));
        let mut scale_loop = loop_over(&store, &counters, flaky, object.clone());

        let report = scale_loop.tick().await.unwrap();
        assert_eq!(report.applied, Some(3));
        let stored = store.get_scaling_object(&object.table_key()).unwrap().unwrap();
        assert_eq!(stored.status.desired_replicas, None);

        // Next tick writes status normally.
        scale_loop.tick().await.unwrap();
        let stored = store.get_scaling_object(&object.table_key()).unwrap().unwrap();
        assert_eq!(stored.status.desired_replicas, Some(3));
    }

    #[tokio::test]
    async fn missing_target_is_reported_in_status() {
        let store = StateStore::open_in_memory().unwrap();
        let counters = StubCounters::default();
        let object = create(&store, scaling_object(vec![stub_trigger(&[("value", "1")])], 0, 10));
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        let mut scale_loop = loop_over(&store, &counters, flaky, object.clone());

        assert!(matches!(scale_loop.tick().await, Err(ScaleError::TargetNotFound(_))));
        let status = store.get_scaling_object(&object.table_key()).unwrap().unwrap().status;
        assert_eq!(
            status.condition(ConditionKind::Ready, None).unwrap().reason,
            "ScaleTargetNotFound"
        );
    }

    #[tokio::test]
    async fn manager_restarts_on_new_generation_and_stops_cleanly() {
        let (store, counters) = fixture(1);
        let object = create(&store, scaling_object(vec![stub_trigger(&[("value", "2")])], 0, 10));
        let manager = ScaleLoopManager::new(Arc::new(handler(&store, &counters)));
        let key = object.table_key();

        assert!(manager.start(&object).await);
        assert!(!manager.start(&object).await);
        assert_eq!(manager.generation(&key).await, Some(1));

        let mut changed = object.clone();
        changed.meta.generation = 2;
        assert!(manager.start(&changed).await);
        assert_eq!(manager.generation(&key).await, Some(2));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.stop(&key).await);
        assert!(!manager.is_running(&key).await);
        assert!(!manager.stop(&key).await);

        // Every scaler built by the loops was released.
        assert_eq!(
            counters.built.load(Ordering::SeqCst),
            counters.released.load(Ordering::SeqCst)
        );
        assert_eq!(store.get_workload("default", "Deployment", "worker").unwrap().unwrap().replicas, 2);
    }

    #[tokio::test]
    async fn failed_scale_write_is_recorded_in_status() {
        let (store, counters) = fixture(1);
        let object = create(&store, scaling_object(vec![stub_trigger(&[("value", "3")])], 0, 10));
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        flaky.fail_scale_writes.store(true, Ordering::SeqCst);
        let mut scale_loop = loop_over(&store, &counters, flaky, object.clone());

        assert!(matches!(scale_loop.tick().await, Err(ScaleError::State(_))));

        let status = store.get_scaling_object(&object.table_key()).unwrap().unwrap().status;
        let ready = status.condition(ConditionKind::Ready, None).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "ScaleUpdateFailed");
        assert_eq!(status.desired_replicas, Some(3));
        assert_eq!(status.last_scale_time, None);
        assert_eq!(status.trigger_health["stub-0"].state, TriggerHealthState::Happy);
        assert_eq!(store.get_workload("default", "Deployment", "worker").unwrap().unwrap().replicas, 1);
    }

    #[tokio::test]
    async fn failed_scale_read_is_recorded_in_status() {
        let (store, counters) = fixture(1);
        let object = create(&store, scaling_object(vec![stub_trigger(&[("value", "3")])], 0, 10));
        let flaky = Arc::new(FlakyOrchestrator::new(store.clone(), 0));
        flaky.fail_scale_reads.store(true, Ordering::SeqCst);
        let mut scale_loop = loop_over(&store, &counters, flaky, object.clone());

        assert!(matches!(scale_loop.tick().await, Err(ScaleError::State(_))));
        let status = store.get_scaling_object(&object.table_key()).unwrap().unwrap().status;
        assert_eq!(
            status.condition(ConditionKind::Ready, None).unwrap().reason,
            "StateError"
        );
    }

    #[tokio::test]
    async fn restarting_one_loop_does_not_block_the_others() {
        let (store, counters) = fixture(1);
        let slow = create(&store, scaling_object(vec![stub_trigger(&[("value", "1"), ("sleepMs", "800")])], 0, 10));
        let manager = ScaleLoopManager::new(Arc::new(handler(&store, &counters)));
        manager.start(&slow).await;
        // Let the first tick get into its slow measurement.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut next = slow.clone();
        next.meta.generation = 2;
        let restarting = manager.clone();
        let restart = tokio::spawn(async move { restarting.start(&next).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        assert!(!manager.is_running("other/unrelated").await);
        assert!(started.elapsed() < Duration::from_millis(300));

        assert!(restart.await.unwrap());
        assert_eq!(manager.generation(&slow.table_key()).await, Some(2));
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn stop_all_drains_loops() {
        let (store, counters) = fixture(1);
        let object = create(&store, scaling_object(vec![stub_trigger(&[("value", "1")])], 0, 10));
        let manager = ScaleLoopManager::new(Arc::new(handler(&store, &counters)));
        manager.start(&object).await;
        assert_eq!(manager.active_loops().await, vec![object.table_key()]);
        manager.stop_all().await;
        assert!(manager.active_loops().await.is_empty());
    }
}
