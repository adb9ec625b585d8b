//! The `Scaler` capability and the inputs a constructor receives.

use std::collections::HashMap;

use async_trait::async_trait;
use surge_state::IdentityMode;

use crate::error::ScalerResult;
use crate::metadata::TriggerMetadata;
use crate::metric::{Measurement, MetricSpec, MetricTargetType, metric_name};

/// A runtime unit measuring one trigger.
///
/// Instances live for a single poll cycle. The owner must call
/// [`release`](Scaler::release) exactly once when done, whether or not
/// `measure` succeeded.
#[async_trait]
pub trait Scaler: Send + Sync {
    /// The metrics this scaler reports, in the order readings are produced.
    fn metric_specs(&self) -> Vec<MetricSpec>;

    /// Read the current value(s) and activation signal.
    async fn measure(&self) -> ScalerResult<Measurement>;

    /// Close any connection held by the scaler.
    async fn release(&self) -> ScalerResult<()>;
}

/// Everything a scaler constructor gets to work with.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub object_name: String,
    pub namespace: String,
    /// Position of the trigger in the scaling object; part of metric names.
    pub trigger_index: usize,
    pub trigger_type: String,
    /// Container environment of the scale target, resolved for this cycle.
    pub resolved_env: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    /// Parameters resolved from the trigger's authentication sources.
    pub auth_params: HashMap<String, String>,
    pub identity: IdentityMode,
    pub metric_type: MetricTargetType,
}

impl ScalerConfig {
    /// Typed access to trigger parameters.
    pub fn metadata(&self) -> TriggerMetadata<'_> {
        TriggerMetadata::new(self)
    }

    /// Metric name for this trigger: `s{index}-{type}-{detail}`.
    pub fn metric_name(&self, detail: &str) -> String {
        metric_name(self.trigger_index, &self.trigger_type, detail)
    }

    /// `{namespace}/{name}` of the owning scaling object.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.namespace, self.object_name)
    }
}
