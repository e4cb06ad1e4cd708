//! Job scheduling
//!
//! The [`Scheduler`] trait is the seam between the instance manager and
//! whatever drives time. [`CronScheduler`] is the tokio-based implementation
//! used by the daemon.

mod cron_scheduler;

pub use cron_scheduler::CronScheduler;

use crate::error::{Error, Result};
use async_trait::async_trait;
use cron::Schedule;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Boxed future returned by a job body
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A job body; invoked once per tick with the scheduler's cancellation token
pub type JobTask = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// Identifier of a registered job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Timer-driven job runner
///
/// Implementations must never run two ticks of the same job concurrently:
/// ticks that elapse while a run is in progress are skipped.
#[async_trait]
pub trait Scheduler: Send {
    /// Register a named job driven by a cron expression
    fn register(&mut self, name: &str, cron: &str, task: JobTask) -> Result<JobId>;

    /// Begin firing registered jobs
    fn start(&mut self) -> Result<()>;

    /// Cancel running jobs as soon as `parent` is cancelled
    ///
    /// The default does nothing; jobs then see cancellation only through
    /// [`Scheduler::shutdown`].
    fn link(&mut self, parent: &CancellationToken) {
        let _ = parent;
    }

    /// Stop firing, wait up to `grace` for running jobs, then abort the rest
    async fn shutdown(&mut self, grace: Duration) -> Result<()>;
}

/// Parse a cron expression
///
/// Standard 5-field expressions (`min hour dom month dow`) get a leading
/// seconds field of `0`; 6 and 7 field expressions are used as-is.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();

    let normalized = match fields {
        5 => format!("0 {}", trimmed),
        6 | 7 => trimmed.to_string(),
        _ => {
            return Err(Error::scheduler(format!(
                "cron expression {:?} must have 5, 6 or 7 fields",
                expression
            )));
        }
    };

    Schedule::from_str(&normalized)
        .map_err(|e| Error::scheduler(format!("invalid cron expression {:?}: {}", expression, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};

    #[test]
    fn five_field_expression_fires_on_the_minute() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.second(), 0);
        assert_eq!(next.minute() % 5, 0);
    }

    #[test]
    fn six_field_expression_is_kept() {
        assert!(parse_schedule("*/10 * * * * *").is_ok());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(parse_schedule("").is_err());
        assert!(parse_schedule("* * *").is_err());
        assert!(parse_schedule("61 * * * *").is_err());
    }
}
