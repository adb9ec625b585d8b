//! surge-controller — the lifecycle of a scaling object.
//!
//! ```text
//!  Unmanaged ──finalizer persisted──► FinalizingEntry ──original count
//!      │                                    │            captured, loop──► Active
//!      │ deleted before                     │ deleted                        │
//!      │ first reconcile                    ▼                                │ deletion
//!      │                             FinalizingExit ◄────────────────────────┘ requested
//!      │                                    │ loop stopped, cycle released,
//!      ▼                                    │ original count restored
//!   Removed ◄───────finalizer removed───────┘
//! ```
//!
//! The [`Reconciler`] performs one idempotent pass for one object; the
//! [`Controller`] runs that pass for every object on a fixed resync interval.

pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod reconciler;

pub use controller::Controller;
pub use error::{ControllerError, ControllerResult};
pub use lifecycle::{FINALIZER, LifecyclePhase};
pub use reconciler::Reconciler;
