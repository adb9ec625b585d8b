//! StateStore — redb-backed persistence for Surge.
//!
//! Provides typed operations over scaling objects, trigger authentications,
//! workloads, secrets and config maps. All values are JSON-serialized into
//! redb's `&[u8]` value columns. Scaling-object writes are guarded by a
//! resource version so concurrent writers observe conflicts instead of
//! silently overwriting each other. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [SCALING_OBJECTS, TRIGGER_AUTHS, WORKLOADS, SECRETS, CONFIG_MAPS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Scaling objects ────────────────────────────────────────────

    /// Insert a new scaling object. Fails if the key is taken.
    pub fn create_scaling_object(&self, object: &ScalingObject) -> StateResult<ScalingObject> {
        let key = object.table_key();
        let now = epoch_secs();
        let mut stored = object.clone();
        stored.meta = ObjectMeta {
            resource_version: 1,
            generation: 1,
            finalizers: object.meta.finalizers.clone(),
            deletion_requested_at: None,
            created_at: now,
            updated_at: now,
        };
        let bytes = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(SCALING_OBJECTS).map_err(map_err!(Table))?;
            if t.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            t.insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "scaling object created");
        Ok(stored)
    }

    /// Create or replace the user-owned part of a scaling object.
    ///
    /// Status and store bookkeeping of an existing object are preserved; the
    /// generation is bumped when target, triggers or policy change.
    pub fn apply_scaling_object(&self, object: &ScalingObject) -> StateResult<ScalingObject> {
        let key = object.table_key();
        match self.get_scaling_object(&key)? {
            None => self.create_scaling_object(object),
            Some(existing) => {
                let mut next = existing.clone();
                next.target = object.target.clone();
                next.triggers = object.triggers.clone();
                next.policy = object.policy.clone();
                self.compare_and_swap(&next)
            }
        }
    }

    /// Get a scaling object by `{namespace}/{name}` key.
    pub fn get_scaling_object(&self, key: &str) -> StateResult<Option<ScalingObject>> {
        self.get_json(SCALING_OBJECTS, key)
    }

    /// List all scaling objects.
    pub fn list_scaling_objects(&self) -> StateResult<Vec<ScalingObject>> {
        self.list_json(SCALING_OBJECTS)
    }

    /// Write a scaling object if its resource version is still current.
    ///
    /// Deletion marker and generation are owned by the store. An object that
    /// is marked for deletion and carries no finalizers is removed instead of
    /// written; the returned copy reflects the final state either way.
    pub fn compare_and_swap(&self, object: &ScalingObject) -> StateResult<ScalingObject> {
        let key = object.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut t = txn.open_table(SCALING_OBJECTS).map_err(map_err!(Table))?;
            let current: ScalingObject = match t.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key)),
            };

            if current.meta.resource_version != object.meta.resource_version {
                return Err(StateError::Conflict {
                    key,
                    expected: object.meta.resource_version,
                    found: current.meta.resource_version,
                });
            }

            let mut next = object.clone();
            next.meta.deletion_requested_at = current.meta.deletion_requested_at;
            next.meta.created_at = current.meta.created_at;
            next.meta.resource_version = current.meta.resource_version + 1;
            next.meta.generation = if next.spec_differs(&current) {
                current.meta.generation + 1
            } else {
                current.meta.generation
            };
            next.meta.updated_at = epoch_secs();

            if next.is_deleting() && next.meta.finalizers.is_empty() {
                t.remove(key.as_str()).map_err(map_err!(Write))?;
                debug!(%key, "scaling object removed after last finalizer");
            } else {
                let bytes = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
                t.insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            result = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }

    /// Request deletion of a scaling object. Returns true if it existed.
    ///
    /// Objects without finalizers are removed immediately; others are marked
    /// and removed once the last finalizer is released.
    pub fn request_deletion(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(SCALING_OBJECTS).map_err(map_err!(Table))?;
            let current: Option<ScalingObject> = match t.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            existed = current.is_some();
            if let Some(mut object) = current {
                if object.meta.finalizers.is_empty() {
                    t.remove(key).map_err(map_err!(Write))?;
                } else if object.meta.deletion_requested_at.is_none() {
                    object.meta.deletion_requested_at = Some(epoch_secs());
                    object.meta.resource_version += 1;
                    let bytes = serde_json::to_vec(&object).map_err(map_err!(Serialize))?;
                    t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "scaling object deletion requested");
        Ok(existed)
    }

    // ── Trigger authentications ────────────────────────────────────

    pub fn put_trigger_authentication(&self, auth: &TriggerAuthentication) -> StateResult<()> {
        self.put_json(TRIGGER_AUTHS, &auth.table_key(), auth)
    }

    pub fn get_trigger_authentication(
        &self,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<TriggerAuthentication>> {
        self.get_json(TRIGGER_AUTHS, &format!("{namespace}/{name}"))
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or update a workload.
    pub fn put_workload(&self, workload: &Workload) -> StateResult<()> {
        let key = workload.table_key();
        self.put_json(WORKLOADS, &key, workload)?;
        debug!(%key, replicas = workload.replicas, "workload stored");
        Ok(())
    }

    pub fn get_workload(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> StateResult<Option<Workload>> {
        self.get_json(WORKLOADS, &workload_key(namespace, kind, name))
    }

    /// Set the replica count of an existing workload.
    pub fn set_replicas(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        replicas: u32,
    ) -> StateResult<()> {
        let key = workload_key(namespace, kind, name);
        let mut workload: Workload = self
            .get_json(WORKLOADS, &key)?
            .ok_or_else(|| StateError::NotFound(key.clone()))?;
        workload.replicas = replicas;
        self.put_json(WORKLOADS, &key, &workload)
    }

    /// Delete a workload. Returns true if it existed.
    pub fn delete_workload(&self, namespace: &str, kind: &str, name: &str) -> StateResult<bool> {
        self.remove(WORKLOADS, &workload_key(namespace, kind, name))
    }

    // ── Secrets and config maps ────────────────────────────────────

    pub fn put_secret(&self, secret: &Secret) -> StateResult<()> {
        self.put_json(SECRETS, &secret.table_key(), secret)
    }

    pub fn get_secret(&self, namespace: &str, name: &str) -> StateResult<Option<Secret>> {
        self.get_json(SECRETS, &format!("{namespace}/{name}"))
    }

    pub fn put_config_map(&self, config_map: &ConfigMap) -> StateResult<()> {
        self.put_json(CONFIG_MAPS, &config_map.table_key(), config_map)
    }

    pub fn get_config_map(&self, namespace: &str, name: &str) -> StateResult<Option<ConfigMap>> {
        self.get_json(CONFIG_MAPS, &format!("{namespace}/{name}"))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
