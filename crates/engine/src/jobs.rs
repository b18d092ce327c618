//! Dataset refresh queue: writes enqueue jobs, a worker claims and runs them
//! at-least-once. Handlers must be idempotent.

use anyhow::Result;
use async_trait::async_trait;
use persistence::repository::JobRepository;
use persistence::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A claimed unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    pub payload: Option<String>,
    pub attempts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns `None` when a job of the same type is already pending
    async fn enqueue(&self, job_type: &str, payload: Option<&str>) -> Result<Option<i64>>;
    /// Move the oldest pending job to running
    async fn claim_next(&self) -> Result<Option<Job>>;
    async fn complete(&self, id: i64) -> Result<()>;
    async fn fail(&self, id: i64, error: &str) -> Result<()>;
    /// Return jobs stuck in running (e.g. after a crash) to pending
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64>;
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

/// Queue backed by the `jobs` table
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> JobRepository<'_> {
        JobRepository::new(&self.pool)
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job_type: &str, payload: Option<&str>) -> Result<Option<i64>> {
        Ok(self.repo().enqueue(job_type, payload).await?)
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        Ok(self.repo().claim_next().await?.map(|r| Job {
            id: r.id,
            job_type: r.job_type,
            payload: r.payload,
            attempts: r.attempts,
        }))
    }

    async fn complete(&self, id: i64) -> Result<()> {
        Ok(self.repo().mark_done(id).await?)
    }

    async fn fail(&self, id: i64, error: &str) -> Result<()> {
        Ok(self.repo().mark_failed(id, error).await?)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        Ok(self.repo().requeue_stale(older_than.as_secs() as i64).await?)
    }
}

struct MemoryJob {
    job: Job,
    status: JobStatus,
    last_error: Option<String>,
    started: Option<Instant>,
}

/// Process-local queue with the same semantics as the SQLite one
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<MemoryJob>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: i64) -> Option<JobStatus> {
        let jobs = self.jobs.lock().ok()?;
        jobs.iter().find(|j| j.job.id == id).map(|j| j.status)
    }

    pub fn last_error(&self, id: i64) -> Option<String> {
        let jobs = self.jobs.lock().ok()?;
        jobs.iter()
            .find(|j| j.job.id == id)
            .and_then(|j| j.last_error.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<MemoryJob>>> {
        self.jobs
            .lock()
            .map_err(|_| anyhow::anyhow!("job queue lock poisoned"))
    }

    fn update(&self, id: i64, status: JobStatus, error: Option<&str>) -> Result<()> {
        let mut jobs = self.lock()?;
        let Some(entry) = jobs.iter_mut().find(|j| j.job.id == id) else {
            anyhow::bail!("unknown job {id}");
        };
        entry.status = status;
        entry.last_error = error.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_type: &str, payload: Option<&str>) -> Result<Option<i64>> {
        let mut jobs = self.lock()?;
        let duplicate = jobs
            .iter()
            .any(|j| j.status == JobStatus::Pending && j.job.job_type == job_type);
        if duplicate {
            return Ok(None);
        }
        let id = jobs.len() as i64 + 1;
        jobs.push(MemoryJob {
            job: Job {
                id,
                job_type: job_type.to_string(),
                payload: payload.map(str::to_string),
                attempts: 0,
            },
            status: JobStatus::Pending,
            last_error: None,
            started: None,
        });
        Ok(Some(id))
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let mut jobs = self.lock()?;
        let Some(entry) = jobs.iter_mut().find(|j| j.status == JobStatus::Pending) else {
            return Ok(None);
        };
        entry.status = JobStatus::Running;
        entry.started = Some(Instant::now());
        entry.job.attempts += 1;
        Ok(Some(entry.job.clone()))
    }

    async fn complete(&self, id: i64) -> Result<()> {
        self.update(id, JobStatus::Done, None)
    }

    async fn fail(&self, id: i64, error: &str) -> Result<()> {
        self.update(id, JobStatus::Failed, Some(error))
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let mut jobs = self.lock()?;
        let mut requeued = 0;
        for entry in jobs.iter_mut() {
            let stale = entry.status == JobStatus::Running
                && entry.started.is_some_and(|t| t.elapsed() >= older_than);
            if stale {
                entry.status = JobStatus::Pending;
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

/// Outcome of one worker step
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done(i64),
    Failed { id: i64, error: String },
}

/// Claim one job and run it. `Ok(None)` when the queue is empty.
pub async fn process_next(queue: &dyn JobQueue, handler: &dyn JobHandler) -> Result<Option<JobOutcome>> {
    let Some(job) = queue.claim_next().await? else {
        return Ok(None);
    };
    debug!(id = job.id, job_type = %job.job_type, attempt = job.attempts, "Job claimed");

    match handler.handle(&job).await {
        Ok(()) => {
            queue.complete(job.id).await?;
            info!(id = job.id, job_type = %job.job_type, "Job done");
            Ok(Some(JobOutcome::Done(job.id)))
        }
        Err(e) => {
            let message = format!("{e:#}");
            queue.fail(job.id, &message).await?;
            error!(id = job.id, job_type = %job.job_type, error = %message, "Job failed");
            Ok(Some(JobOutcome::Failed {
                id: job.id,
                error: message,
            }))
        }
    }
}

/// Shared worker state, polled by the loop and flipped by the owner
#[derive(Debug, Default)]
pub struct WorkerProgress {
    pub cancelled: AtomicBool,
    pub processed: AtomicU32,
    pub failed: AtomicU32,
}

impl WorkerProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    /// Running jobs older than this are requeued on start
    pub stale_after: Duration,
    /// Stop once the queue is empty instead of polling
    pub drain: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(15 * 60),
            drain: false,
        }
    }
}

/// Poll the queue until cancelled (or drained, in drain mode)
pub async fn run_worker(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    progress: Arc<WorkerProgress>,
) -> Result<()> {
    let requeued = queue.requeue_stale(config.stale_after).await?;
    if requeued > 0 {
        warn!(requeued, "Requeued stale running jobs");
    }
    info!(poll_secs = config.poll_interval.as_secs(), drain = config.drain, "Worker started");

    while !progress.cancelled.load(Ordering::Relaxed) {
        match process_next(queue.as_ref(), handler.as_ref()).await {
            Ok(Some(JobOutcome::Done(_))) => {
                progress.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Some(JobOutcome::Failed { .. })) => {
                progress.failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                if config.drain {
                    break;
                }
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(e) => {
                warn!(error = %e, "Queue unavailable; retrying");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }

    info!(
        processed = progress.processed.load(Ordering::Relaxed),
        failed = progress.failed.load(Ordering::Relaxed),
        "Worker stopped"
    );
    Ok(())
}
