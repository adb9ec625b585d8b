//! Trigger type tag → scaler constructor.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::backend::MetricBackend;
use crate::builtin::{self, cron, metrics_api};
use crate::error::{ScalerError, ScalerResult};
use crate::scaler::{Scaler, ScalerConfig};
use crate::source::SourceScaler;

/// Builds a scaler from a resolved trigger config, validating its metadata.
pub type ScalerFactory = Arc<dyn Fn(&ScalerConfig) -> ScalerResult<Box<dyn Scaler>> + Send + Sync>;

/// The set of trigger types this control plane can scale on.
#[derive(Clone, Default)]
pub struct ScalerRegistry {
    factories: BTreeMap<String, ScalerFactory>,
}

impl ScalerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the self-contained trigger types (`cron`, `metrics-api`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(cron::TRIGGER_TYPE, |config| {
            Ok(Box::new(cron::CronScaler::new(config)?) as Box<dyn Scaler>)
        });
        registry.register(metrics_api::TRIGGER_TYPE, |config| {
            Ok(Box::new(metrics_api::MetricsApiScaler::new(config)?) as Box<dyn Scaler>)
        });
        registry
    }

    /// Register (or replace) the constructor for a trigger type.
    pub fn register<F>(&mut self, trigger_type: &str, factory: F)
    where
        F: Fn(&ScalerConfig) -> ScalerResult<Box<dyn Scaler>> + Send + Sync + 'static,
    {
        debug!(trigger_type, "registered scaler");
        self.factories
            .insert(trigger_type.to_string(), Arc::new(factory));
    }

    /// Enable a backend-driven trigger type (`queue`, `stream`, `sql`,
    /// `cloud-metric`, `external`) by supplying the backend that speaks its
    /// protocol.
    pub fn register_backend(
        &mut self,
        trigger_type: &str,
        backend: Arc<dyn MetricBackend>,
    ) -> ScalerResult<()> {
        let parse = builtin::source_parser(trigger_type).ok_or_else(|| {
            ScalerError::Config(format!(
                "{trigger_type:?} is not a backend-driven trigger type"
            ))
        })?;
        self.register(trigger_type, move |config| {
            let source = parse(config)?;
            Ok(Box::new(SourceScaler::new(config, source, backend.clone())) as Box<dyn Scaler>)
        });
        Ok(())
    }

    /// Construct the scaler for `config.trigger_type`.
    pub fn build(&self, config: &ScalerConfig) -> ScalerResult<Box<dyn Scaler>> {
        let factory = self
            .factories
            .get(&config.trigger_type)
            .ok_or_else(|| ScalerError::UnknownType(config.trigger_type.clone()))?;
        factory(config)
    }

    pub fn contains(&self, trigger_type: &str) -> bool {
        self.factories.contains_key(trigger_type)
    }

    /// Registered trigger types, sorted.
    pub fn trigger_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ScalerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalerRegistry")
            .field("trigger_types", &self.trigger_types())
            .finish()
    }
}
