//! Lifecycle phases of a scaling object.

use serde::{Deserialize, Serialize};

use surge_state::ScalingObject;

/// Finalizer marking objects whose cleanup this controller owns.
pub const FINALIZER: &str = "autoscaling.surge.dev/finalizer";

/// Where a scaling object is in its managed lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecyclePhase {
    /// Declared but never reconciled: no finalizer yet.
    Unmanaged,
    /// Finalizer persisted; no scale loop running yet.
    FinalizingEntry,
    /// Scale loop running.
    Active,
    /// Deletion requested and finalizer still present.
    FinalizingExit,
    /// Gone from the store, or deleting with no finalizer left.
    Removed,
}

impl LifecyclePhase {
    /// Derive the phase from the stored object and whether its loop runs.
    pub fn observe(object: Option<&ScalingObject>, loop_running: bool) -> Self {
        match object {
            // Hard-deleted underneath a running loop.
            None if loop_running => Self::Active,
            None => Self::Removed,
            Some(o) if o.is_deleting() => {
                if o.has_finalizer(FINALIZER) {
                    Self::FinalizingExit
                } else {
                    Self::Removed
                }
            }
            Some(o) if !o.has_finalizer(FINALIZER) => Self::Unmanaged,
            Some(_) if loop_running => Self::Active,
            Some(_) => Self::FinalizingEntry,
        }
    }

    /// Whether a reconcile pass may move an object from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Unmanaged, FinalizingEntry)
                | (Unmanaged, Removed)
                | (FinalizingEntry, Active)
                | (FinalizingEntry, FinalizingExit)
                | (Active, Active)
                | (Active, FinalizingEntry)
                | (Active, FinalizingExit)
                | (Active, Removed)
                | (FinalizingExit, FinalizingExit)
                | (FinalizingExit, Removed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Removed
    }
}
