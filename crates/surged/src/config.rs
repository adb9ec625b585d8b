//! Daemon configuration and the declarative resource manifest.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use surge_autoscale::HandlerConfig;
use surge_state::{
    ConfigMap, ScalingObject, Secret, StateStore, TriggerAuthentication, Workload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `surged.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between full reconcile passes.
    pub resync_interval_secs: u64,
    pub measure_timeout_secs: u64,
    pub release_timeout_secs: u64,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: 30,
            measure_timeout_secs: 10,
            release_timeout_secs: 5,
            log_format: LogFormat::Text,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.resync_interval_secs > 0, "resync_interval_secs must be > 0");
        anyhow::ensure!(self.measure_timeout_secs > 0, "measure_timeout_secs must be > 0");
        anyhow::ensure!(self.release_timeout_secs > 0, "release_timeout_secs must be > 0");
        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn handler(&self) -> HandlerConfig {
        HandlerConfig {
            measure_timeout: Duration::from_secs(self.measure_timeout_secs),
            release_timeout: Duration::from_secs(self.release_timeout_secs),
        }
    }
}

/// Resources to load into the store at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub workloads: Vec<Workload>,
    pub secrets: Vec<Secret>,
    pub config_maps: Vec<ConfigMap>,
    pub trigger_authentications: Vec<TriggerAuthentication>,
    pub scaling_objects: Vec<ScalingObject>,
}

/// What [`Manifest::apply`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplySummary {
    pub applied: usize,
    /// Stored scaling objects absent from the manifest, now marked for deletion.
    pub pruned: usize,
}

impl Manifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write every declared resource into `store`.
    ///
    /// Existing workloads keep their live replica count. Scaling objects not
    /// declared here are marked for deletion so they are finalized normally.
    pub fn apply(&self, store: &StateStore) -> anyhow::Result<ApplySummary> {
        let mut summary = ApplySummary::default();

        for workload in &self.workloads {
            let mut next = workload.clone();
            if let Some(live) = store.get_workload(&workload.namespace, &workload.kind, &workload.name)? {
                next.replicas = live.replicas;
            }
            store.put_workload(&next)?;
            summary.applied += 1;
        }
        for secret in &self.secrets {
            store.put_secret(secret)?;
            summary.applied += 1;
        }
        for config_map in &self.config_maps {
            store.put_config_map(config_map)?;
            summary.applied += 1;
        }
        for auth in &self.trigger_authentications {
            store.put_trigger_authentication(auth)?;
            summary.applied += 1;
        }

        let declared: Vec<String> = self.scaling_objects.iter().map(ScalingObject::table_key).collect();
        for object in &self.scaling_objects {
            let stored = store.apply_scaling_object(object)?;
            debug!(object = %stored.table_key(), generation = stored.meta.generation, "scaling object applied");
            summary.applied += 1;
        }
        for stored in store.list_scaling_objects()? {
            let key = stored.table_key();
            if !declared.contains(&key) && !stored.is_deleting() {
                store.request_deletion(&key)?;
                info!(object = %key, "scaling object no longer declared, deleting");
                summary.pruned += 1;
            }
        }
        Ok(summary)
    }
}
