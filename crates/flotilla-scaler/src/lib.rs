//! flotilla-scaler — the scaling controller.
//!
//! Collapses a user-issued "set total instances of type T to N" into a
//! deterministic sequence of primitive operations:
//!
//! ```text
//! EVALUATE → (no-op if magnitude == 0) → SEQUENCE[1..magnitude] → RECONCILE → DONE
//! ```
//!
//! Steps run strictly one after another; a failed step aborts the rest
//! and leaves the partial state in place. There is no rollback: the
//! next request re-derives its magnitude from live counts, so partial
//! progress converges under retry. The proxy is reconciled exactly once
//! per fully successful sequence.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use flotilla_balancer::{Directory, DirectoryError, ProxyReconciler, ReconcileError};
use flotilla_core::KeyedLocks;
use flotilla_fleet::{FleetController, FleetError};

/// Which way a scaling transaction moves the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Grow,
    Shrink,
    /// Already at the target; nothing to do.
    Unchanged,
}

/// Outcome of a completed scaling transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleReport {
    pub service_type: String,
    pub target_total: u32,
    pub direction: ScaleDirection,
    /// Number of steps the transaction was committed to at evaluation.
    /// Fixed once the sequence begins, never re-evaluated mid-flight.
    pub magnitude: u32,
}

/// A single failed step inside a scaling sequence.
#[derive(Debug, Error)]
pub enum ScaleStepError {
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Errors from a scaling transaction.
#[derive(Debug, Error)]
pub enum ScaleError {
    /// The initial count read failed; no steps were attempted.
    #[error("unable to evaluate scaling request for {service_type:?}: {source}")]
    Evaluate {
        service_type: String,
        source: FleetError,
    },

    /// A step failed mid-sequence. Completed steps are not rolled back.
    #[error(
        "scaling {service_type:?} to {target_total} aborted after {steps_completed} of {magnitude} steps: {source}"
    )]
    Aborted {
        service_type: String,
        target_total: u32,
        steps_completed: u32,
        magnitude: u32,
        source: ScaleStepError,
    },

    /// All steps completed but the proxy reload failed. Fleet and
    /// directory agree with each other; only the live proxy is stale.
    #[error("proxy reconcile failed after scaling {service_type:?}: {source}")]
    Reconcile {
        service_type: String,
        source: ReconcileError,
    },
}

/// The load-balancer group owning all instances of a service type.
pub fn group_name(service_type: &str) -> String {
    format!("{service_type}-balancer")
}

/// Orchestrates multi-step scale-up/scale-down across the fleet
/// controller and the balancer directory.
pub struct ScalingController {
    fleet: Arc<FleetController>,
    directory: Arc<Directory>,
    reconciler: Arc<ProxyReconciler>,
    /// One transaction at a time per type, so overlapping requests
    /// cannot interleave membership edits on the same group.
    locks: KeyedLocks,
}

impl ScalingController {
    pub fn new(
        fleet: Arc<FleetController>,
        directory: Arc<Directory>,
        reconciler: Arc<ProxyReconciler>,
    ) -> Self {
        Self {
            fleet,
            directory,
            reconciler,
            locks: KeyedLocks::new(),
        }
    }

    /// Run one scaling transaction to `target_total` instances.
    pub async fn set_total(
        &self,
        service_type: &str,
        target_total: u32,
    ) -> Result<ScaleReport, ScaleError> {
        let lock = self.locks.acquire(service_type);
        let _guard = lock.lock().await;

        let current = self
            .fleet
            .count_by_type(service_type)
            .await
            .map_err(|source| ScaleError::Evaluate {
                service_type: service_type.to_string(),
                source,
            })?;

        let (direction, magnitude) = if target_total > current {
            (ScaleDirection::Grow, target_total - current)
        } else if target_total < current {
            (ScaleDirection::Shrink, current - target_total)
        } else {
            (ScaleDirection::Unchanged, 0)
        };

        if magnitude == 0 {
            info!(service_type, target_total, "fleet already at target");
            return Ok(ScaleReport {
                service_type: service_type.to_string(),
                target_total,
                direction,
                magnitude,
            });
        }

        info!(
            service_type,
            from = current,
            to = target_total,
            magnitude,
            direction = ?direction,
            "scaling sequence starting"
        );

        let group = group_name(service_type);
        for step in 0..magnitude {
            let result = match direction {
                ScaleDirection::Grow => self.grow_step(service_type, &group).await,
                ScaleDirection::Shrink => self.shrink_step(service_type, &group).await,
                ScaleDirection::Unchanged => unreachable!("magnitude is non-zero"),
            };

            if let Err(source) = result {
                warn!(
                    service_type,
                    step = step + 1,
                    magnitude,
                    error = %source,
                    "scaling step failed, aborting remaining steps"
                );
                return Err(ScaleError::Aborted {
                    service_type: service_type.to_string(),
                    target_total,
                    steps_completed: step,
                    magnitude,
                    source,
                });
            }
        }

        // Exactly one reload for the whole sequence.
        self.reconciler
            .reconcile()
            .await
            .map_err(|source| ScaleError::Reconcile {
                service_type: service_type.to_string(),
                source,
            })?;

        info!(service_type, target_total, magnitude, "scaling sequence complete");
        Ok(ScaleReport {
            service_type: service_type.to_string(),
            target_total,
            direction,
            magnitude,
        })
    }

    async fn grow_step(&self, service_type: &str, group: &str) -> Result<(), ScaleStepError> {
        let instance = self.fleet.start_instance(service_type).await?;
        self.directory.add_member(group, &instance.address())?;
        Ok(())
    }

    async fn shrink_step(&self, service_type: &str, group: &str) -> Result<(), ScaleStepError> {
        let instance = self.fleet.stop_instance(service_type).await?;
        self.directory.remove_member(group, &instance.address())?;
        Ok(())
    }
}
