//! ScaleHandler — one poll cycle for one scaling object.
//!
//! ```text
//! workload ──► env ──► per trigger: credentials ──► registry.build()
//!                                           │ failures recorded per trigger
//!                                           ▼
//!                         measure() × N   (concurrent, timeout, panic-safe)
//!                                           ▼
//!                         release() × N   (always, every built scaler)
//!                                           ▼
//!                         ScalingDecision (None if nothing measured)
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, warn};

use surge_scalers::{Measurement, Scaler, ScalerConfig, ScalerRegistry};
use surge_state::{Orchestrator, ScalingObject, SecretStore};

use crate::decision::ScalingDecision;
use crate::error::{ScaleError, ScaleResult};
use crate::resolver::CredentialResolver;

/// Per-call bounds for scaler I/O.
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    pub measure_timeout: Duration,
    pub release_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            measure_timeout: Duration::from_secs(10),
            release_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened to one trigger during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Measured { active: bool },
    /// The scaler could not be built: bad metadata, unknown type or credentials.
    ConfigInvalid(String),
    /// Built, but `measure()` errored, timed out or panicked.
    MeasureFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerReport {
    pub index: usize,
    pub name: String,
    pub outcome: TriggerOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    /// `None` when every built scaler failed to measure.
    pub decision: Option<ScalingDecision>,
    /// One report per declared trigger, in declaration order.
    pub triggers: Vec<TriggerReport>,
}

struct Built {
    index: usize,
    name: String,
    scaler: Box<dyn Scaler>,
}

pub struct ScaleHandler {
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<ScalerRegistry>,
    resolver: CredentialResolver,
    config: HandlerConfig,
}

impl ScaleHandler {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        secrets: Arc<dyn SecretStore>,
        registry: Arc<ScalerRegistry>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            resolver: CredentialResolver::new(orchestrator.clone(), secrets),
            orchestrator,
            registry,
            config,
        }
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    /// Run one cycle.
    ///
    /// Fails only when the scale target is missing or no trigger could be
    /// built; individual measurement failures are reported per trigger.
    pub async fn run_cycle(&self, object: &ScalingObject) -> ScaleResult<CycleOutcome> {
        let key = object.table_key();
        let workload = self
            .orchestrator
            .get_workload(&object.namespace, &object.target)
            .await?
            .ok_or_else(|| {
                ScaleError::TargetNotFound(format!(
                    "{}/{}/{}",
                    object.namespace, object.target.kind, object.target.name
                ))
            })?;

        let env = self
            .resolver
            .resolve_env(&workload, object.target.container_name.as_deref())
            .await;
        for e in &env.errors {
            warn!(object = %key, error = %e, "container env entry unresolved");
        }

        let mut reports = Vec::with_capacity(object.triggers.len());
        let mut built = Vec::new();
        for (index, trigger) in object.triggers.iter().enumerate() {
            let name = object.trigger_name(index);
            let result = async {
                let resolved = self
                    .resolver
                    .resolve_trigger(&object.namespace, &workload, &env, trigger)
                    .await?;
                let config = ScalerConfig {
                    object_name: object.name.clone(),
                    namespace: object.namespace.clone(),
                    trigger_index: index,
                    trigger_type: trigger.trigger_type.clone(),
                    resolved_env: env.values.clone(),
                    metadata: trigger.metadata.clone(),
                    auth_params: resolved.params,
                    identity: resolved.identity,
                    metric_type: trigger.metric_type,
                };
                let build = std::panic::catch_unwind(AssertUnwindSafe(|| self.registry.build(&config)));
                match build {
                    Ok(scaler) => Ok(scaler?),
                    Err(_) => Err(ScaleError::Config(format!(
                        "{} scaler panicked during construction",
                        trigger.trigger_type
                    ))),
                }
            }
            .await;

            match result {
                Ok(scaler) => built.push(Built {
                    index,
                    name,
                    scaler,
                }),
                Err(e) => {
                    warn!(object = %key, trigger = %name, error = %e, "trigger unusable this cycle");
                    reports.push(TriggerReport {
                        index,
                        name,
                        outcome: TriggerOutcome::ConfigInvalid(e.to_string()),
                    });
                }
            }
        }

        if built.is_empty() {
            let detail = reports
                .iter()
                .filter_map(|r| match &r.outcome {
                    TriggerOutcome::ConfigInvalid(e) => Some(format!("{}: {e}", r.name)),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ScaleError::Config(format!("no usable triggers ({detail})")));
        }

        let measurements = join_all(built.iter().map(|b| self.measure(&key, b))).await;
        self.release_all(&key, &built).await;

        let mut decision = ScalingDecision::default();
        let mut measured_any = false;
        for (b, result) in built.iter().zip(measurements) {
            let outcome = match result {
                Ok(m) => {
                    measured_any = true;
                    decision.is_active |= m.active;
                    decision.readings.extend(m.readings);
                    TriggerOutcome::Measured { active: m.active }
                }
                Err(e) => {
                    warn!(object = %key, trigger = %b.name, error = %e, "measurement failed");
                    TriggerOutcome::MeasureFailed(e.to_string())
                }
            };
            reports.push(TriggerReport {
                index: b.index,
                name: b.name.clone(),
                outcome,
            });
        }
        reports.sort_by_key(|r| r.index);

        debug!(
            object = %key,
            active = decision.is_active,
            readings = decision.readings.len(),
            "cycle complete"
        );
        Ok(CycleOutcome {
            decision: measured_any.then_some(decision),
            triggers: reports,
        })
    }

    async fn measure(&self, key: &str, built: &Built) -> ScaleResult<Measurement> {
        let timeout = self.config.measure_timeout;
        let call = tokio::time::timeout(timeout, built.scaler.measure());
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(Ok(m))) => Ok(m),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(_)) => Err(ScaleError::TransientBackend(format!(
                "measure timed out after {timeout:?}"
            ))),
            Err(_) => {
                warn!(object = %key, trigger = %built.name, "scaler panicked during measure");
                Err(ScaleError::TransientBackend("scaler panicked".to_string()))
            }
        }
    }

    async fn release_all(&self, key: &str, built: &[Built]) {
        let timeout = self.config.release_timeout;
        let releases = built.iter().map(|b| async move {
            let call = tokio::time::timeout(timeout, b.scaler.release());
            let failure = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(e))) => Some(e.to_string()),
                Ok(Err(_)) => Some(format!("timed out after {timeout:?}")),
                Err(_) => Some("panicked".to_string()),
            };
            if let Some(error) = failure {
                warn!(object = %key, trigger = %b.name, %error, "scaler release failed");
            }
        });
        join_all(releases).await;
    }
}
