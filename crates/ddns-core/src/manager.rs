//! Instance manager
//!
//! Owns every [`ReconciliationInstance`] of a configuration, registers one
//! scheduled job per instance, and stops the scheduler with a bounded grace
//! period once the root cancellation token fires.

use crate::error::{Error, Result};
use crate::instance::{ReconcileOutcome, ReconciliationInstance};
use crate::scheduler::{CronScheduler, JobFuture, JobTask, Scheduler};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default time allowed for in-flight passes after shutdown begins
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Drives all instances from a [`Scheduler`]
///
/// ## Lifecycle
///
/// 1. Create with [`InstanceManager::new()`] (names must be unique)
/// 2. Spawn [`InstanceManager::run()`] with the root cancellation token
/// 3. Cancel the token; `run` stops the scheduler and returns
pub struct InstanceManager<S: Scheduler = CronScheduler> {
    instances: Vec<Arc<Mutex<ReconciliationInstance>>>,
    names: Vec<String>,
    crons: Vec<String>,
    scheduler: S,
    grace: Duration,
}

impl InstanceManager<CronScheduler> {
    /// Create a manager backed by a [`CronScheduler`]
    ///
    /// The scheduler is linked to the token given to [`InstanceManager::run()`],
    /// so jobs see root cancellation without waiting for shutdown.
    pub fn new(instances: Vec<ReconciliationInstance>) -> Result<Self> {
        Self::with_scheduler(instances, CronScheduler::new())
    }
}

impl<S: Scheduler> InstanceManager<S> {
    /// Create a manager with a custom scheduler
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: No instances, or two instances share a name
    pub fn with_scheduler(instances: Vec<ReconciliationInstance>, scheduler: S) -> Result<Self> {
        if instances.is_empty() {
            return Err(Error::config("no records configured"));
        }

        let mut seen = HashSet::new();
        for instance in &instances {
            if !seen.insert(instance.name().to_string()) {
                return Err(Error::config(format!(
                    "record {} is defined more than once",
                    instance.name()
                )));
            }
        }

        let names = instances.iter().map(|i| i.name().to_string()).collect();
        let crons = instances.iter().map(|i| i.spec().cron.clone()).collect();

        Ok(Self {
            instances: instances
                .into_iter()
                .map(|i| Arc::new(Mutex::new(i)))
                .collect(),
            names,
            crons,
            scheduler,
            grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Override the shutdown grace period
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Names of the managed records, in configuration order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Register every job, start the scheduler and wait for `ctx` to be cancelled
    ///
    /// Pass errors are logged and swallowed; only scheduling errors are returned.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        self.scheduler.link(&ctx);

        for ((instance, name), cron) in self.instances.iter().zip(&self.names).zip(&self.crons) {
            let id = self
                .scheduler
                .register(name, cron, reconcile_job(instance.clone(), name.clone()))?;
            info!(record = %name, job = %id, "registered reconcile job ({})", cron);
        }

        self.scheduler.start()?;
        info!("{} record(s) scheduled", self.instances.len());

        ctx.cancelled().await;
        info!("shutting down scheduler (grace {:?})", self.grace);

        if let Err(e) = self.scheduler.shutdown(self.grace).await {
            warn!("scheduler shutdown incomplete: {}", e);
        }

        Ok(())
    }
}

fn reconcile_job(instance: Arc<Mutex<ReconciliationInstance>>, name: String) -> JobTask {
    Arc::new(move |ctx: CancellationToken| -> JobFuture {
        let instance = instance.clone();
        let name = name.clone();
        Box::pin(async move {
            let mut instance = instance.lock().await;
            match instance.do_update(&ctx).await {
                Ok(ReconcileOutcome::Unchanged { .. }) => {}
                Ok(outcome) => info!(record = %name, "record reconciled: {:?}", outcome),
                Err(e) if e.is_cancellation() => warn!(record = %name, "pass interrupted: {}", e),
                Err(e) => error!(record = %name, "failed to reconcile record: {}", e),
            }
        })
    })
}
