//! Fakes shared by this crate's tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use surge_scalers::{
    Measurement, MetricReading, MetricSpec, Scaler, ScalerError, ScalerRegistry, ScalerResult,
};
use surge_state::*;

use crate::handler::{HandlerConfig, ScaleHandler};

pub const STUB: &str = "stub";

/// Counters and a value feed shared with every stub scaler.
#[derive(Clone, Default)]
pub struct StubCounters {
    pub built: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    feed: Arc<Mutex<VecDeque<(f64, bool)>>>,
}

impl StubCounters {
    /// Queue the reading returned by the next stub without a fixed `value`.
    pub fn push(&self, value: f64, active: bool) {
        self.feed.lock().unwrap().push_back((value, active));
    }

    /// A registry holding the `stub` type.
    ///
    /// Metadata: `value`, `active`, `target`, `fail`, `panic`, `sleepMs`,
    /// `broken` (constructor error), `panicOnBuild`.
    pub fn registry(&self) -> ScalerRegistry {
        let counters = self.clone();
        let mut registry = ScalerRegistry::new();
        registry.register(STUB, move |config| {
            let meta = config.metadata();
            if meta.bool_or("broken", false)? {
                return Err(ScalerError::Config("stub is broken".to_string()));
            }
            if meta.bool_or("panicOnBuild", false)? {
                panic!("stub constructor panicked");
            }
            let fixed = match meta.optional_str("value")? {
                Some(_) => Some(meta.required_f64("value")?),
                None => None,
            };
            let active = match meta.optional_str("active")? {
                Some(_) => Some(meta.bool_or("active", false)?),
                None => None,
            };
            counters.built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubScaler {
                spec: MetricSpec {
                    name: config.metric_name("load"),
                    target_value: meta.f64_or("target", 1.0)?,
                    target_type: config.metric_type,
                },
                fixed,
                active,
                fail: meta.bool_or("fail", false)?,
                panic: meta.bool_or("panic", false)?,
                sleep: Duration::from_millis(meta.u64_or("sleepMs", 0)?),
                counters: counters.clone(),
            }) as Box<dyn Scaler>)
        });
        registry
    }
}

struct StubScaler {
    spec: MetricSpec,
    fixed: Option<f64>,
    active: Option<bool>,
    fail: bool,
    panic: bool,
    sleep: Duration,
    counters: StubCounters,
}

#[async_trait]
impl Scaler for StubScaler {
    fn metric_specs(&self) -> Vec<MetricSpec> {
        vec![self.spec.clone()]
    }

    async fn measure(&self) -> ScalerResult<Measurement> {
        if !self.sleep.is_zero() {
            tokio::time::sleep(self.sleep).await;
        }
        if self.panic {
            panic!("stub scaler panicked");
        }
        if self.fail {
            return Err(ScalerError::Backend("stub backend down".to_string()));
        }
        let (value, fed_active) = match self.fixed {
            Some(v) => (v, v > 0.0),
            None => self
                .counters
                .feed
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((0.0, false)),
        };
        Ok(Measurement {
            active: self.active.unwrap_or(fed_active),
            readings: vec![MetricReading::new(&self.spec, value)],
        })
    }

    async fn release(&self) -> ScalerResult<()> {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn workload(replicas: u32) -> Workload {
    Workload {
        namespace: "default".to_string(),
        name: "worker".to_string(),
        kind: "Deployment".to_string(),
        replicas,
        annotations: BTreeMap::new(),
        containers: vec![Container {
            name: "app".to_string(),
            env: vec![],
        }],
    }
}

/// An in-memory store holding `default/Deployment/worker` at `replicas`.
pub fn fixture(replicas: u32) -> (StateStore, StubCounters) {
    let store = StateStore::open_in_memory().unwrap();
    store.put_workload(&workload(replicas)).unwrap();
    (store, StubCounters::default())
}

pub fn handler(store: &StateStore, counters: &StubCounters) -> ScaleHandler {
    ScaleHandler::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(counters.registry()),
        HandlerConfig::default(),
    )
}

pub fn stub_trigger(metadata: &[(&str, &str)]) -> TriggerSpec {
    TriggerSpec {
        trigger_type: STUB.to_string(),
        name: None,
        metadata: metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        auth_ref: None,
        identity: IdentityMode::None,
        metric_type: MetricTargetType::AverageValue,
    }
}

pub fn scaling_object(triggers: Vec<TriggerSpec>, min: u32, max: u32) -> ScalingObject {
    ScalingObject {
        namespace: "default".to_string(),
        name: "worker-scaler".to_string(),
        target: ScaleTargetRef {
            kind: "Deployment".to_string(),
            name: "worker".to_string(),
            container_name: None,
        },
        triggers,
        policy: ScalingPolicy {
            min_replicas: min,
            max_replicas: max,
            polling_interval_secs: Some(1),
            ..ScalingPolicy::default()
        },
        status: ScalingStatus::default(),
        meta: ObjectMeta::default(),
    }
}

/// Wraps a store, counting scale writes and failing the first
/// `conflicts` object updates with a version conflict. The scale
/// subresource can be made to fail on read or write.
pub struct FlakyOrchestrator {
    pub inner: StateStore,
    pub conflicts: AtomicU32,
    pub scale_updates: AtomicU32,
    pub fail_scale_reads: AtomicBool,
    pub fail_scale_writes: AtomicBool,
}

impl FlakyOrchestrator {
    pub fn new(inner: StateStore, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(conflicts),
            scale_updates: AtomicU32::new(0),
            fail_scale_reads: AtomicBool::new(false),
            fail_scale_writes: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Orchestrator for FlakyOrchestrator {
    async fn list_scaling_objects(&self) -> StateResult<Vec<ScalingObject>> {
        Orchestrator::list_scaling_objects(&self.inner).await
    }

    async fn get_scaling_object(&self, key: &str) -> StateResult<Option<ScalingObject>> {
        Orchestrator::get_scaling_object(&self.inner, key).await
    }

    async fn update_scaling_object(&self, object: &ScalingObject) -> StateResult<ScalingObject> {
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StateError::Conflict {
                key: object.table_key(),
                expected: object.meta.resource_version,
                found: object.meta.resource_version + 1,
            });
        }
        self.inner.update_scaling_object(object).await
    }

    async fn get_trigger_authentication(
        &self,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<TriggerAuthentication>> {
        Orchestrator::get_trigger_authentication(&self.inner, namespace, name).await
    }

    async fn get_workload(
        &self,
        namespace: &str,
        target: &ScaleTargetRef,
    ) -> StateResult<Option<Workload>> {
        Orchestrator::get_workload(&self.inner, namespace, target).await
    }

    async fn get_scale(&self, namespace: &str, target: &ScaleTargetRef) -> StateResult<u32> {
        if self.fail_scale_reads.load(Ordering::SeqCst) {
            return Err(StateError::Read("scale subresource unavailable".to_string()));
        }
        self.inner.get_scale(namespace, target).await
    }

    async fn update_scale(
        &self,
        namespace: &str,
        target: &ScaleTargetRef,
        replicas: u32,
    ) -> StateResult<()> {
        self.scale_updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_scale_writes.load(Ordering::SeqCst) {
            return Err(StateError::Write("scale subresource rejected the update".to_string()));
        }
        self.inner.update_scale(namespace, target, replicas).await
    }
}
