//! surge-state — the persisted model of the Surge autoscaler.
//!
//! Defines the scaling object, its triggers, policy and status, the
//! workloads it targets, and the credential sources triggers may reference.
//! Two interfaces describe the outside world the control plane talks to:
//!
//! - [`Orchestrator`] — scaling objects (with optimistic concurrency),
//!   workloads, and the scale subresource
//! - [`SecretStore`] — secret and config-map field lookup
//!
//! # Architecture
//!
//! ```text
//! StateStore (redb, Arc<Database>)
//!   ├── scaling_objects          {namespace}/{name} -> ScalingObject
//!   ├── trigger_authentications  {namespace}/{name} -> TriggerAuthentication
//!   ├── workloads                {namespace}/{kind}/{name} -> Workload
//!   ├── secrets                  {namespace}/{name} -> Secret
//!   └── config_maps              {namespace}/{name} -> ConfigMap
//! ```
//!
//! `StateStore` implements both interfaces, so the standalone daemon and the
//! test suites drive the control plane against the same backend.

pub mod error;
pub mod orchestrator;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use orchestrator::{Orchestrator, SecretStore};
pub use store::StateStore;
pub use types::*;
