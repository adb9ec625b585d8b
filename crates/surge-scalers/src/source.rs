//! `SourceScaler` — the shared scaler for backend-driven trigger types.
//!
//! Each backend-driven trigger type contributes a parser that turns its
//! metadata into a [`SourceSpec`]; this module supplies the one `Scaler`
//! implementation they all share. The backend connection is opened lazily on
//! the first `measure()` and closed by `release()`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{BackendConnection, BackendTarget, MetricBackend};
use crate::error::{ScalerError, ScalerResult};
use crate::metric::{Measurement, MetricReading, MetricSpec};
use crate::scaler::{Scaler, ScalerConfig};

/// Parser from validated trigger metadata to a source description.
pub type SourceParser = fn(&ScalerConfig) -> ScalerResult<SourceSpec>;

/// What a backend-driven trigger measures, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    /// Suffix for the metric name (`s{index}-{type}-{detail}`).
    pub metric_detail: String,
    pub target_value: f64,
    /// The trigger is active when the value exceeds this threshold.
    pub activation_threshold: f64,
    pub params: BTreeMap<String, String>,
    pub auth: BTreeMap<String, String>,
}

pub struct SourceScaler {
    target: BackendTarget,
    spec: MetricSpec,
    activation_threshold: f64,
    backend: Arc<dyn MetricBackend>,
    connection: Mutex<Option<Box<dyn BackendConnection>>>,
}

impl SourceScaler {
    pub fn new(config: &ScalerConfig, source: SourceSpec, backend: Arc<dyn MetricBackend>) -> Self {
        let spec = MetricSpec {
            name: config.metric_name(&source.metric_detail),
            target_value: source.target_value,
            target_type: config.metric_type,
        };
        let target = BackendTarget {
            trigger_type: config.trigger_type.clone(),
            object: config.object_key(),
            params: source.params,
            auth: source.auth,
            identity: config.identity,
        };
        Self {
            target,
            spec,
            activation_threshold: source.activation_threshold,
            backend,
            connection: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Scaler for SourceScaler {
    fn metric_specs(&self) -> Vec<MetricSpec> {
        vec![self.spec.clone()]
    }

    async fn measure(&self) -> ScalerResult<Measurement> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            debug!(
                metric = %self.spec.name,
                object = %self.target.object,
                "opening metric source connection"
            );
            let conn = self.backend.connect(&self.target).await?;
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ScalerError::Backend(
                "metric source connection unavailable".to_string(),
            ));
        };
        let sample = conn.sample().await?;

        let active = sample
            .active
            .unwrap_or(sample.value > self.activation_threshold);
        Ok(Measurement {
            active,
            readings: vec![MetricReading::new(&self.spec, sample.value)],
        })
    }

    async fn release(&self) -> ScalerResult<()> {
        let conn = self.connection.lock().await.take();
        match conn {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

/// Copy the named keys of a resolved auth map, skipping absent ones.
pub(crate) fn pick_auth(config: &ScalerConfig, keys: &[&str]) -> BTreeMap<String, String> {
    keys.iter()
        .filter_map(|k| {
            config
                .metadata()
                .auth_param(k)
                .map(|v| (k.to_string(), v.to_string()))
        })
        .collect()
}
