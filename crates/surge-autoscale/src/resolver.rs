//! Credential resolution for triggers.
//!
//! Resolution runs every cycle and nothing is cached, so rotated secrets are
//! picked up on the next tick. A failing reference never stops the others
//! from resolving; all failures for a trigger are reported together.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use surge_scalers::builtin::cloud::identity_parameter;
use surge_state::{
    IdentityMode, KeyRef, Orchestrator, SecretStore, StateResult, TriggerSpec, Workload,
};

use crate::error::{ScaleError, ScaleResult};

/// Workload annotation carrying the identity for each provider.
pub fn identity_annotation(identity: IdentityMode) -> Option<&'static str> {
    match identity {
        IdentityMode::None => None,
        IdentityMode::Aws => Some("eks.amazonaws.com/role-arn"),
        IdentityMode::Azure => Some("azure.workload.identity/client-id"),
        IdentityMode::Gcp => Some("iam.gke.io/gcp-service-account"),
    }
}

/// A container's environment with unresolvable entries left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedEnv {
    pub values: HashMap<String, String>,
    /// One message per non-optional variable that could not be resolved.
    pub errors: Vec<String>,
}

/// Authentication parameters for one trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrigger {
    pub params: HashMap<String, String>,
    /// Trigger identity, or the authentication's pod identity when the
    /// trigger declares none.
    pub identity: IdentityMode,
}

#[derive(Clone)]
pub struct CredentialResolver {
    orchestrator: Arc<dyn Orchestrator>,
    secrets: Arc<dyn SecretStore>,
}

impl CredentialResolver {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            orchestrator,
            secrets,
        }
    }

    /// Resolve the environment of `container` (or the first container).
    pub async fn resolve_env(&self, workload: &Workload, container: Option<&str>) -> ResolvedEnv {
        let mut resolved = ResolvedEnv::default();
        let Some(container) = workload.container(container) else {
            if let Some(name) = container {
                resolved
                    .errors
                    .push(format!("container {name:?} not found in {}", workload.name));
            }
            return resolved;
        };

        for var in &container.env {
            if let Some(value) = &var.value {
                resolved.values.insert(var.name.clone(), value.clone());
                continue;
            }
            let Some(source) = &var.value_from else {
                continue;
            };
            let (lookup, key_ref, kind) = if let Some(r) = &source.secret_key_ref {
                (self.secret_field(&workload.namespace, r).await, r, "secret")
            } else if let Some(r) = &source.config_map_key_ref {
                (self.config_field(&workload.namespace, r).await, r, "config map")
            } else {
                continue;
            };

            match lookup {
                Ok(Some(value)) => {
                    resolved.values.insert(var.name.clone(), value);
                }
                Ok(None) if key_ref.optional => {
                    debug!(env = %var.name, "optional {kind} reference missing, skipping");
                }
                Ok(None) => resolved.errors.push(format!(
                    "env {}: {kind} {}/{} not found",
                    var.name, key_ref.name, key_ref.key
                )),
                Err(e) => resolved
                    .errors
                    .push(format!("env {}: reading {kind} {}: {e}", var.name, key_ref.name)),
            }
        }
        resolved
    }

    async fn secret_field(&self, namespace: &str, r: &KeyRef) -> StateResult<Option<String>> {
        self.secrets.get_secret_field(namespace, &r.name, &r.key).await
    }

    async fn config_field(&self, namespace: &str, r: &KeyRef) -> StateResult<Option<String>> {
        self.secrets.get_config_field(namespace, &r.name, &r.key).await
    }

    /// Resolve a trigger's authentication reference and identity.
    ///
    /// `env` is the already-resolved environment of the scale target's
    /// container; env target refs naming another container resolve that
    /// container's environment on demand.
    pub async fn resolve_trigger(
        &self,
        namespace: &str,
        workload: &Workload,
        env: &ResolvedEnv,
        trigger: &TriggerSpec,
    ) -> ScaleResult<ResolvedTrigger> {
        let mut params = HashMap::new();
        let mut errors = Vec::new();
        let mut identity = trigger.identity;
        let mut identity_id = None;

        if let Some(auth_ref) = &trigger.auth_ref {
            let auth = self
                .orchestrator
                .get_trigger_authentication(namespace, &auth_ref.name)
                .await?
                .ok_or_else(|| {
                    ScaleError::Config(format!(
                        "trigger authentication {namespace}/{} not found",
                        auth_ref.name
                    ))
                })?;

            for r in &auth.secret_target_refs {
                match self.secrets.get_secret_field(namespace, &r.name, &r.key).await {
                    Ok(Some(v)) => {
                        params.insert(r.parameter.clone(), v);
                    }
                    Ok(None) => errors.push(format!(
                        "{}: secret {}/{} not found",
                        r.parameter, r.name, r.key
                    )),
                    Err(e) => errors.push(format!("{}: reading secret {}: {e}", r.parameter, r.name)),
                }
            }

            for r in &auth.config_map_target_refs {
                match self.secrets.get_config_field(namespace, &r.name, &r.key).await {
                    Ok(Some(v)) => {
                        params.insert(r.parameter.clone(), v);
                    }
                    Ok(None) => errors.push(format!(
                        "{}: config map {}/{} not found",
                        r.parameter, r.name, r.key
                    )),
                    Err(e) => errors.push(format!(
                        "{}: reading config map {}: {e}",
                        r.parameter, r.name
                    )),
                }
            }

            for r in &auth.env_target_refs {
                let value = match &r.container_name {
                    Some(c) => self
                        .resolve_env(workload, Some(c))
                        .await
                        .values
                        .remove(&r.name),
                    None => env.values.get(&r.name).cloned(),
                };
                match value {
                    Some(v) => {
                        params.insert(r.parameter.clone(), v);
                    }
                    None => errors.push(format!(
                        "{}: env {} not resolved on target container",
                        r.parameter, r.name
                    )),
                }
            }

            if let Some(pod) = &auth.pod_identity {
                if identity == IdentityMode::None {
                    identity = pod.provider;
                }
                if pod.provider == identity {
                    identity_id = pod.identity_id.clone();
                }
            }
        }

        if let (Some(param), Some(annotation)) =
            (identity_parameter(identity), identity_annotation(identity))
        {
            let id = identity_id.or_else(|| workload.annotations.get(annotation).cloned());
            match id {
                Some(id) => {
                    params.insert(param.to_string(), id);
                }
                None => errors.push(format!(
                    "{identity:?} identity: workload {} has no {annotation} annotation",
                    workload.name
                )),
            }
        }

        if !errors.is_empty() {
            warn!(
                trigger = %trigger.trigger_type,
                failures = errors.len(),
                "credential resolution failed"
            );
            return Err(ScaleError::Config(errors.join("; ")));
        }
        Ok(ResolvedTrigger { params, identity })
    }
}
