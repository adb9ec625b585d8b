//! Interfaces to the orchestrator and the secret/config stores.
//!
//! The control plane only ever talks to the outside world through these
//! traits. Both are implemented by [`StateStore`], which makes the embedded
//! store usable as the standalone backend and as a test fixture; a cluster
//! deployment supplies its own API-backed implementations.

use async_trait::async_trait;

use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::types::*;

/// Orchestrator resource API: scaling objects, workloads, scale subresource.
///
/// Implementations are shared by every scaling object's task and must be
/// internally synchronized.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_scaling_objects(&self) -> StateResult<Vec<ScalingObject>>;

    /// Fetch a scaling object by `{namespace}/{name}` key.
    async fn get_scaling_object(&self, key: &str) -> StateResult<Option<ScalingObject>>;

    /// Write a scaling object, failing with [`StateError::Conflict`] if it
    /// changed since it was read.
    async fn update_scaling_object(&self, object: &ScalingObject) -> StateResult<ScalingObject>;

    async fn get_trigger_authentication(
        &self,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<TriggerAuthentication>>;

    /// Workload spec (containers, annotations) behind a scale target.
    async fn get_workload(
        &self,
        namespace: &str,
        target: &ScaleTargetRef,
    ) -> StateResult<Option<Workload>>;

    /// Current replica count, or [`StateError::NotFound`].
    async fn get_scale(&self, namespace: &str, target: &ScaleTargetRef) -> StateResult<u32>;

    async fn update_scale(
        &self,
        namespace: &str,
        target: &ScaleTargetRef,
        replicas: u32,
    ) -> StateResult<()>;
}

/// Secret and config-map field lookup. `Ok(None)` means not found.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_field(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> StateResult<Option<String>>;

    async fn get_config_field(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> StateResult<Option<String>>;
}

#[async_trait]
impl Orchestrator for StateStore {
    async fn list_scaling_objects(&self) -> StateResult<Vec<ScalingObject>> {
        StateStore::list_scaling_objects(self)
    }

    async fn get_scaling_object(&self, key: &str) -> StateResult<Option<ScalingObject>> {
        StateStore::get_scaling_object(self, key)
    }

    async fn update_scaling_object(&self, object: &ScalingObject) -> StateResult<ScalingObject> {
        self.compare_and_swap(object)
    }

    async fn get_trigger_authentication(
        &self,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<TriggerAuthentication>> {
        StateStore::get_trigger_authentication(self, namespace, name)
    }

    async fn get_workload(
        &self,
        namespace: &str,
        target: &ScaleTargetRef,
    ) -> StateResult<Option<Workload>> {
        StateStore::get_workload(self, namespace, &target.kind, &target.name)
    }

    async fn get_scale(&self, namespace: &str, target: &ScaleTargetRef) -> StateResult<u32> {
        StateStore::get_workload(self, namespace, &target.kind, &target.name)?
            .map(|w| w.replicas)
            .ok_or_else(|| StateError::NotFound(workload_key(namespace, &target.kind, &target.name)))
    }

    async fn update_scale(
        &self,
        namespace: &str,
        target: &ScaleTargetRef,
        replicas: u32,
    ) -> StateResult<()> {
        self.set_replicas(namespace, &target.kind, &target.name, replicas)
    }
}

#[async_trait]
impl SecretStore for StateStore {
    async fn get_secret_field(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> StateResult<Option<String>> {
        Ok(self
            .get_secret(namespace, name)?
            .and_then(|s| s.data.get(key).cloned()))
    }

    async fn get_config_field(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> StateResult<Option<String>> {
        Ok(self
            .get_config_map(namespace, name)?
            .and_then(|c| c.data.get(key).cloned()))
    }
}
