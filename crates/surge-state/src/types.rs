//! Domain types for the Surge state layer.
//!
//! These types represent the persisted state of scaling objects, the
//! workloads they target, and the credential sources their triggers may
//! reference. All types are serializable to/from JSON for storage in redb
//! tables and deserializable from TOML manifests.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Polling interval applied when a policy does not set one.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 30;

/// Scale-down cooldown applied when a policy does not set one.
pub const DEFAULT_COOLDOWN_PERIOD_SECS: u64 = 300;

/// Upper replica bound applied when a manifest does not set one.
pub const DEFAULT_MAX_REPLICAS: u32 = 100;

// ── Scaling object ────────────────────────────────────────────────

/// Declares event-driven autoscaling for one workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingObject {
    pub namespace: String,
    pub name: String,
    /// The workload whose replica count is driven.
    pub target: ScaleTargetRef,
    /// Ordered list of triggers; must be non-empty to be schedulable.
    pub triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub policy: ScalingPolicy,
    #[serde(default)]
    pub status: ScalingStatus,
    #[serde(default)]
    pub meta: ObjectMeta,
}

/// Bookkeeping owned by the store: versions, finalizers, deletion marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObjectMeta {
    /// Bumped on every successful write; used for optimistic concurrency.
    pub resource_version: u64,
    /// Bumped whenever target, triggers or policy change.
    pub generation: u64,
    pub finalizers: Vec<String>,
    /// Unix timestamp (seconds) at which deletion was requested.
    pub deletion_requested_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Reference to the scaled workload, resolved in the object's namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleTargetRef {
    #[serde(default = "default_target_kind")]
    pub kind: String,
    pub name: String,
    /// Container whose environment feeds trigger parameters.
    /// Defaults to the first container.
    #[serde(default)]
    pub container_name: Option<String>,
}

fn default_target_kind() -> String {
    "Deployment".to_string()
}

/// One declared event source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerSpec {
    /// Type tag selecting the scaler implementation ("cron", "queue", ...).
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// Optional stable name, used in conditions and metric names.
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form, scaler-specific parameters.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub auth_ref: Option<AuthRef>,
    #[serde(default)]
    pub identity: IdentityMode,
    #[serde(default)]
    pub metric_type: MetricTargetType,
}

/// Reference to a `TriggerAuthentication` in the object's namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthRef {
    pub name: String,
}

/// Ambient workload identity a trigger authenticates with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    #[default]
    None,
    Aws,
    Azure,
    Gcp,
}

/// How a trigger's target value is normalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MetricTargetType {
    /// Total across the workload; scales with the current replica count.
    Value,
    /// Already a per-replica average.
    #[default]
    AverageValue,
}

/// Replica bounds and timing for one scaling object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    #[serde(default)]
    pub min_replicas: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
    #[serde(default)]
    pub polling_interval_secs: Option<u64>,
    #[serde(default)]
    pub cooldown_period_secs: Option<u64>,
    #[serde(default)]
    pub restore_original_replica_count_on_delete: bool,
}

fn default_max_replicas() -> u32 {
    DEFAULT_MAX_REPLICAS
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_replicas: 0,
            max_replicas: DEFAULT_MAX_REPLICAS,
            polling_interval_secs: None,
            cooldown_period_secs: None,
            restore_original_replica_count_on_delete: false,
        }
    }
}

impl ScalingPolicy {
    /// Effective polling interval.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(
            self.polling_interval_secs
                .unwrap_or(DEFAULT_POLLING_INTERVAL_SECS),
        )
    }

    /// Effective scale-down cooldown.
    pub fn cooldown_period(&self) -> Duration {
        Duration::from_secs(
            self.cooldown_period_secs
                .unwrap_or(DEFAULT_COOLDOWN_PERIOD_SECS),
        )
    }

    /// Scale-to-zero is permitted only when the lower bound is zero.
    pub fn allows_scale_to_zero(&self) -> bool {
        self.min_replicas == 0
    }

    /// Check `min <= max` and a non-zero polling interval.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_replicas > self.max_replicas {
            return Err(format!(
                "min_replicas ({}) must not exceed max_replicas ({})",
                self.min_replicas, self.max_replicas
            ));
        }
        if self.polling_interval_secs == Some(0) {
            return Err("polling_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

// ── Status ───────────────────────────────────────────────────────

/// Observed state written by the reconciler and the scale loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScalingStatus {
    /// Replica count seen the first time the target was found. Never overwritten.
    pub original_replica_count: Option<u32>,
    /// Unix timestamp of the last cycle in which any trigger was active.
    pub last_active_time: Option<u64>,
    pub scale_target_kind: Option<String>,
    /// Desired count computed by the most recent successful cycle.
    pub desired_replicas: Option<u32>,
    /// Unix timestamp of the last applied replica change.
    pub last_scale_time: Option<u64>,
    pub conditions: Vec<Condition>,
    /// Per-trigger failure tracking, keyed by trigger name.
    pub trigger_health: BTreeMap<String, TriggerHealth>,
}

impl ScalingStatus {
    /// Record the original replica count unless one was already captured.
    ///
    /// Returns `true` if the value was set by this call.
    pub fn capture_original_replicas(&mut self, replicas: u32) -> bool {
        if self.original_replica_count.is_some() {
            return false;
        }
        self.original_replica_count = Some(replicas);
        true
    }

    /// Look up a condition by kind and (for per-trigger conditions) trigger name.
    pub fn condition(&self, kind: ConditionKind, trigger: Option<&str>) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.kind == kind && c.trigger.as_deref() == trigger)
    }

    /// Insert or replace a condition.
    ///
    /// The transition timestamp is preserved when the status value is unchanged.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.kind == condition.kind && c.trigger == condition.trigger)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition = existing.last_transition;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Drop per-trigger conditions and health for triggers no longer declared.
    pub fn retain_triggers(&mut self, names: &[String]) {
        self.conditions.retain(|c| match &c.trigger {
            Some(t) => names.contains(t),
            None => true,
        });
        self.trigger_health.retain(|name, _| names.contains(name));
    }
}

/// A status condition, in the style of orchestrator resource conditions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub kind: ConditionKind,
    /// Set for per-trigger conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition: u64,
}

impl Condition {
    pub fn new(
        kind: ConditionKind,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            kind,
            trigger: None,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition: now,
        }
    }

    /// Attach the condition to a trigger.
    pub fn for_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionKind {
    Ready,
    Active,
    TriggerReady,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Failure tracking for a single trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TriggerHealth {
    pub state: TriggerHealthState,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerHealthState {
    #[default]
    Happy,
    Failing,
}

// ── Workload ─────────────────────────────────────────────────────

/// A scalable workload as seen through the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_target_kind")]
    pub kind: String,
    pub replicas: u32,
    /// Pod-template annotations (identity bindings live here).
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

/// A container environment variable: a literal or an indirection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_from: Option<EnvVarSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EnvVarSource {
    #[serde(default)]
    pub secret_key_ref: Option<KeyRef>,
    #[serde(default)]
    pub config_map_key_ref: Option<KeyRef>,
}

/// A key inside a named secret or config map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyRef {
    pub name: String,
    pub key: String,
    /// Missing references are skipped instead of reported.
    #[serde(default)]
    pub optional: bool,
}

impl Workload {
    /// The container whose environment is resolved for triggers.
    pub fn container(&self, name: Option<&str>) -> Option<&Container> {
        match name {
            Some(n) => self.containers.iter().find(|c| c.name == n),
            None => self.containers.first(),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────

/// Named credential sources a trigger can reference through `auth_ref`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerAuthentication {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub secret_target_refs: Vec<ParameterRef>,
    #[serde(default)]
    pub config_map_target_refs: Vec<ParameterRef>,
    #[serde(default)]
    pub env_target_refs: Vec<EnvTargetRef>,
    #[serde(default)]
    pub pod_identity: Option<PodIdentity>,
}

/// Maps a secret/config-map field onto a scaler parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterRef {
    pub parameter: String,
    pub name: String,
    pub key: String,
}

/// Maps a container environment variable onto a scaler parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvTargetRef {
    pub parameter: String,
    pub name: String,
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodIdentity {
    pub provider: IdentityMode,
    /// Explicit identity (role ARN, client id, service account);
    /// falls back to the workload's identity annotation.
    #[serde(default)]
    pub identity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigMap {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

// ── Keys ─────────────────────────────────────────────────────────

impl ScalingObject {
    /// Build the composite key for the scaling objects table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.meta.finalizers.iter().any(|f| f == finalizer)
    }

    pub fn is_deleting(&self) -> bool {
        self.meta.deletion_requested_at.is_some()
    }

    /// Display name of the trigger at `index`: its declared name or `{type}-{index}`.
    pub fn trigger_name(&self, index: usize) -> String {
        match self.triggers.get(index) {
            Some(TriggerSpec { name: Some(n), .. }) => n.clone(),
            Some(t) => format!("{}-{index}", t.trigger_type),
            None => format!("trigger-{index}"),
        }
    }

    /// Whether the user-owned part of the object differs from `other`.
    pub fn spec_differs(&self, other: &ScalingObject) -> bool {
        self.target != other.target
            || self.triggers != other.triggers
            || self.policy != other.policy
    }
}

impl TriggerAuthentication {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl Workload {
    pub fn table_key(&self) -> String {
        workload_key(&self.namespace, &self.kind, &self.name)
    }
}

impl Secret {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl ConfigMap {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Composite key for the workloads table.
pub fn workload_key(namespace: &str, kind: &str, name: &str) -> String {
    format!("{namespace}/{kind}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(kind: ConditionKind, status: ConditionStatus, now: u64) -> Condition {
        Condition::new(kind, status, "Reason", "message", now)
    }

    #[test]
    fn original_replicas_captured_once() {
        let mut status = ScalingStatus::default();
        assert!(status.capture_original_replicas(3));
        assert!(!status.capture_original_replicas(7));
        assert_eq!(status.original_replica_count, Some(3));
    }

    #[test]
    fn set_condition_keeps_transition_time_when_unchanged() {
        let mut status = ScalingStatus::default();
        status.set_condition(condition(ConditionKind::Ready, ConditionStatus::True, 100));
        status.set_condition(condition(ConditionKind::Ready, ConditionStatus::True, 200));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition, 100);

        status.set_condition(condition(ConditionKind::Ready, ConditionStatus::False, 300));
        assert_eq!(status.conditions[0].last_transition, 300);
    }

    #[test]
    fn trigger_conditions_are_keyed_by_trigger() {
        let mut status = ScalingStatus::default();
        status.set_condition(
            condition(ConditionKind::TriggerReady, ConditionStatus::True, 1).for_trigger("a"),
        );
        status.set_condition(
            condition(ConditionKind::TriggerReady, ConditionStatus::False, 1).for_trigger("b"),
        );
        assert_eq!(status.conditions.len(), 2);
        assert_eq!(
            status
                .condition(ConditionKind::TriggerReady, Some("b"))
                .map(|c| c.status),
            Some(ConditionStatus::False)
        );

        status.retain_triggers(&["a".to_string()]);
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn policy_validation() {
        let mut policy = ScalingPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.polling_interval(), Duration::from_secs(30));
        assert_eq!(policy.cooldown_period(), Duration::from_secs(300));

        policy.min_replicas = 5;
        policy.max_replicas = 2;
        assert!(policy.validate().is_err());

        policy.max_replicas = 5;
        policy.polling_interval_secs = Some(0);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn trigger_names_default_to_type_and_index() {
        let object = ScalingObject {
            namespace: "default".to_string(),
            name: "worker".to_string(),
            target: ScaleTargetRef {
                kind: "Deployment".to_string(),
                name: "worker".to_string(),
                container_name: None,
            },
            triggers: vec![
                TriggerSpec {
                    trigger_type: "queue".to_string(),
                    name: None,
                    metadata: HashMap::new(),
                    auth_ref: None,
                    identity: IdentityMode::None,
                    metric_type: MetricTargetType::AverageValue,
                },
                TriggerSpec {
                    trigger_type: "cron".to_string(),
                    name: Some("business-hours".to_string()),
                    metadata: HashMap::new(),
                    auth_ref: None,
                    identity: IdentityMode::None,
                    metric_type: MetricTargetType::AverageValue,
                },
            ],
            policy: ScalingPolicy::default(),
            status: ScalingStatus::default(),
            meta: ObjectMeta::default(),
        };
        assert_eq!(object.trigger_name(0), "queue-0");
        assert_eq!(object.trigger_name(1), "business-hours");
        assert_eq!(object.table_key(), "default/worker");
    }

    #[test]
    fn manifest_defaults_apply() {
        let json = r#"{
            "namespace": "default",
            "name": "worker",
            "target": { "name": "worker" },
            "triggers": [{ "type": "cron", "metadata": { "start": "0 8 * * *" } }]
        }"#;
        let object: ScalingObject = serde_json::from_str(json).unwrap();
        assert_eq!(object.target.kind, "Deployment");
        assert_eq!(object.policy.max_replicas, DEFAULT_MAX_REPLICAS);
        assert_eq!(object.triggers[0].metric_type, MetricTargetType::AverageValue);
        assert_eq!(object.triggers[0].identity, IdentityMode::None);
        assert!(object.meta.finalizers.is_empty());
    }
}
