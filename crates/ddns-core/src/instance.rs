//! Per-record reconciliation
//!
//! A [`ReconciliationInstance`] binds one [`RecordSpec`] to one detector and
//! one handler and runs a single pass on demand:
//!
//! ```text
//! Idle ─► Detecting ─► Reading ─┬─► Creating ─┐
//!                               ├─► Updating ─┼─► Done
//!                               └─► Skipping ─┘
//!
//! any step ──error──► Failed
//! ```
//!
//! A failed step aborts the pass. Nothing is rolled back and nothing is
//! retried; the next scheduled pass starts again from `Detecting`.

use crate::config::RecordSpec;
use crate::error::Result;
use crate::traits::{AddressDetector, DnsUpdateHandler};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Result of one successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Record did not exist and was created
    Created {
        /// The published address
        address: String,
    },
    /// Record existed with another address and was updated
    Updated {
        /// Address the record had before this pass
        previous: String,
        /// The published address
        address: String,
    },
    /// Record already had the detected address
    Unchanged {
        /// The current address
        address: String,
    },
}

/// Where a pass currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Detecting,
    Reading,
    Creating,
    Updating,
    Skipping,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Detecting => "detecting",
            Phase::Reading => "reading",
            Phase::Creating => "creating",
            Phase::Updating => "updating",
            Phase::Skipping => "skipping",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One managed record with its detector and handler
pub struct ReconciliationInstance {
    spec: Arc<RecordSpec>,
    detector: Box<dyn AddressDetector>,
    handler: Box<dyn DnsUpdateHandler>,
    phase: Phase,
}

impl fmt::Debug for ReconciliationInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationInstance")
            .field("name", &self.spec.name)
            .field("record", &self.spec.fqdn())
            .field("detector", &self.detector.method())
            .field("provider", &self.handler.provider_name())
            .field("phase", &self.phase)
            .finish()
    }
}

impl ReconciliationInstance {
    /// Create an instance
    ///
    /// # Parameters
    ///
    /// - `spec`: The record this instance manages
    /// - `detector`: Built from `spec.detection`
    /// - `handler`: Built from `spec.provider`
    pub fn new(
        spec: Arc<RecordSpec>,
        detector: Box<dyn AddressDetector>,
        handler: Box<dyn DnsUpdateHandler>,
    ) -> Self {
        Self {
            spec,
            detector,
            handler,
            phase: Phase::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &Arc<RecordSpec> {
        &self.spec
    }

    /// Phase reached by the most recent pass
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        debug!(record = %self.spec.name, phase = %phase, "phase transition");
    }

    /// Run one reconcile pass
    ///
    /// # Returns
    ///
    /// - `Ok(ReconcileOutcome)`: What the pass did
    /// - `Err(Error)`: The first failing step's error, unchanged
    pub async fn do_update(&mut self, ctx: &CancellationToken) -> Result<ReconcileOutcome> {
        let result = self.reconcile(ctx).await;

        match &result {
            Ok(_) => self.enter(Phase::Done),
            Err(e) => {
                let failed_in = self.phase;
                self.enter(Phase::Failed);
                error!(
                    record = %self.spec.name,
                    phase = %failed_in,
                    "reconcile pass failed: {}",
                    e
                );
            }
        }

        result
    }

    async fn reconcile(&mut self, ctx: &CancellationToken) -> Result<ReconcileOutcome> {
        let name = self.spec.name.clone();

        self.enter(Phase::Detecting);
        info!(record = %name, "detecting current address via {}", self.detector.method());
        let detected = self.detector.detect(ctx).await?;

        self.enter(Phase::Reading);
        info!(
            record = %name,
            "reading {} record {} from {}",
            self.spec.record_type(),
            self.spec.fqdn(),
            self.handler.provider_name()
        );
        let current = self.handler.get(ctx).await?;

        if current.is_empty() {
            self.enter(Phase::Creating);
            info!(record = %name, "record not found, creating with {}", detected);
            self.handler.create(ctx, &detected).await?;
            return Ok(ReconcileOutcome::Created { address: detected });
        }

        if current != detected {
            self.enter(Phase::Updating);
            info!(record = %name, "address changed {} -> {}, updating", current, detected);
            self.handler.update(ctx, &detected).await?;
            return Ok(ReconcileOutcome::Updated {
                previous: current,
                address: detected,
            });
        }

        self.enter(Phase::Skipping);
        info!(record = %name, "address unchanged ({}), skipping", detected);
        Ok(ReconcileOutcome::Unchanged { address: detected })
    }
}
