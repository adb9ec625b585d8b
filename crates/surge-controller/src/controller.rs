//! Controller — periodic resync of every scaling object.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::lifecycle::LifecyclePhase;
use crate::reconciler::Reconciler;

pub struct Controller {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Resync until `shutdown` fires, then stop every scale loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "controller starting");
        loop {
            self.resync().await;
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    debug!("controller shutting down");
                    break;
                }
            }
        }
        self.reconciler.loops().stop_all().await;
        info!("controller stopped");
    }

    /// One pass over all objects. Returns the number of objects that failed.
    pub async fn resync(&self) -> usize {
        let results = match self.reconciler.reconcile_all().await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "listing scaling objects failed");
                return 1;
            }
        };

        let mut failed = 0;
        let mut active = 0;
        for (key, result) in &results {
            match result {
                Ok(LifecyclePhase::Active) => active += 1,
                Ok(_) => {}
                Err(e @ ControllerError::InvalidSpec { .. }) => {
                    failed += 1;
                    warn!(object = %key, error = %e, "scaling object rejected");
                }
                Err(e @ ControllerError::ReconcileConflict(_)) => {
                    failed += 1;
                    warn!(object = %key, error = %e, "reconcile deferred");
                }
                Err(e) => {
                    failed += 1;
                    error!(object = %key, error = %e, "reconcile failed");
                }
            }
        }
        debug!(objects = results.len(), active, failed, "resync complete");
        failed
    }
}
