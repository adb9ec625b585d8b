//! redb table definitions for the Surge state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Scaling objects keyed by `{namespace}/{name}`.
pub const SCALING_OBJECTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scaling_objects");

/// Trigger authentications keyed by `{namespace}/{name}`.
pub const TRIGGER_AUTHS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("trigger_authentications");

/// Workloads keyed by `{namespace}/{kind}/{name}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Secrets keyed by `{namespace}/{name}`.
pub const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Config maps keyed by `{namespace}/{name}`.
pub const CONFIG_MAPS: TableDefinition<&str, &[u8]> = TableDefinition::new("config_maps");
