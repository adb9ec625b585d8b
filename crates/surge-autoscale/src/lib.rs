//! surge-autoscale — turns trigger measurements into replica counts.
//!
//! One [`ScaleLoop`] runs per scaling object. Every tick it asks the
//! [`ScaleHandler`] for a single coherent cycle (credentials resolved,
//! scalers built, measured concurrently and released), feeds the result
//! through the control law, applies the outcome to the orchestrator's scale
//! subresource and records status.
//!
//! # Control law
//!
//! ```text
//! R = live replicas, value = trigger reading
//!
//! inactive and min == 0            -> 0
//! Value        contribution        =  ceil(R * value / target)
//! AverageValue contribution        =  ceil(value / target)
//! desired                          =  max(contributions), at least 1 when active,
//!                                     clamped to [min, max]
//! failed triggers                  -> excluded from the max
//! every trigger failed             -> no decision, replica count held
//! ```
//!
//! Scale-ups apply immediately. A scale-down applies only once the cooldown
//! period has elapsed since the loop's previous scale-down.

pub mod decision;
pub mod error;
pub mod handler;
pub mod resolver;
pub mod scale_loop;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use decision::{ScalingDecision, desired_replicas, trigger_contribution};
pub use error::{ScaleError, ScaleResult};
pub use handler::{CycleOutcome, HandlerConfig, ScaleHandler, TriggerOutcome, TriggerReport};
pub use resolver::{CredentialResolver, ResolvedEnv, ResolvedTrigger};
pub use scale_loop::{ScaleLoop, ScaleLoopManager, TickReport};
pub use status::update_with_retry;
