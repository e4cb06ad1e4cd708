use super::{JobId, JobTask, Scheduler, parse_schedule};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Job {
    id: JobId,
    name: String,
    schedule: Schedule,
    task: JobTask,
}

/// Cron scheduler running one tokio task per job
///
/// Each job task sleeps until its next fire time, runs the body to
/// completion, then computes the next fire time from "now". Ticks missed while
/// the body was running are skipped, never queued.
pub struct CronScheduler {
    pending: Vec<Job>,
    token: CancellationToken,
    tasks: JoinSet<()>,
    started: bool,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a scheduler whose jobs observe `token` (usually a child of the root token)
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            pending: Vec::new(),
            token,
            tasks: JoinSet::new(),
            started: false,
        }
    }

    /// Number of job tasks still running
    pub fn running(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(job: Job, token: CancellationToken) {
    loop {
        let Some(next) = job.schedule.upcoming(Utc).next() else {
            info!(job = %job.name, "schedule has no further fire times");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(job = %job.name, id = %job.id, "next run at {} (in {:?})", next, wait);

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        (job.task)(token.clone()).await;

        if token.is_cancelled() {
            return;
        }
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    fn register(&mut self, name: &str, cron: &str, task: JobTask) -> Result<JobId> {
        if self.started {
            return Err(Error::scheduler("cannot register jobs after start"));
        }

        let schedule = parse_schedule(cron)?;
        let id = JobId::new();
        self.pending.push(Job {
            id,
            name: name.to_string(),
            schedule,
            task,
        });

        Ok(id)
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::scheduler("scheduler already started"));
        }
        self.started = true;

        for job in self.pending.drain(..) {
            info!(job = %job.name, id = %job.id, "starting cron job");
            self.tasks.spawn(drive(job, self.token.clone()));
        }

        Ok(())
    }

    fn link(&mut self, parent: &CancellationToken) {
        let parent = parent.clone();
        let own = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => own.cancel(),
                _ = own.cancelled() => {}
            }
        });
    }

    async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        self.token.cancel();

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    warn!("cron job panicked: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            let stragglers = self.tasks.len();
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
            return Err(Error::scheduler(format!(
                "{} job(s) still running after {:?}, aborted",
                stragglers, grace
            )));
        }

        info!("scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobFuture;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: Arc<AtomicUsize>, work: Duration) -> JobTask {
        Arc::new(move |_ctx: CancellationToken| -> JobFuture {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
            })
        })
    }

    #[tokio::test]
    async fn fires_every_second() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = CronScheduler::new();
        scheduler
            .register("tick", "* * * * * *", counting_task(counter.clone(), Duration::ZERO))
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(2200)).await;
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn long_running_job_does_not_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let (r, m) = (running.clone(), max_seen.clone());
        let task: JobTask = Arc::new(move |_ctx: CancellationToken| -> JobFuture {
            let (r, m) = (r.clone(), m.clone());
            Box::pin(async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1500)).await;
                r.fetch_sub(1, Ordering::SeqCst);
            })
        });

        let mut scheduler = CronScheduler::new();
        scheduler.register("slow", "* * * * * *", task).unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let _ = scheduler.shutdown(Duration::from_secs(2)).await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stuck_job_is_aborted_after_grace() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = CronScheduler::new();
        scheduler
            .register("stuck", "* * * * * *", counting_task(counter.clone(), Duration::from_secs(60)))
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let started = std::time::Instant::now();
        let result = scheduler.shutdown(Duration::from_millis(100)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(scheduler.running(), 0);
        if counter.load(Ordering::SeqCst) > 0 {
            assert!(matches!(result, Err(Error::Scheduler(_))));
        }
    }

    #[tokio::test]
    async fn linked_parent_cancels_running_jobs() {
        let interrupted = Arc::new(AtomicUsize::new(0));
        let seen = interrupted.clone();
        let task: JobTask = Arc::new(move |ctx: CancellationToken| -> JobFuture {
            let seen = seen.clone();
            Box::pin(async move {
                ctx.cancelled().await;
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });

        let parent = CancellationToken::new();
        let mut scheduler = CronScheduler::new();
        scheduler.link(&parent);
        scheduler.register("waits", "* * * * * *", task).unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(interrupted.load(Ordering::SeqCst), 1);
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn register_rejects_bad_cron() {
        let mut scheduler = CronScheduler::new();
        let task: JobTask = Arc::new(|_: CancellationToken| -> JobFuture { Box::pin(async {}) });
        assert!(scheduler.register("bad", "not cron", task).is_err());
    }
}
