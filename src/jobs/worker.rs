//! Polling workers that drive jobs through the retry state machine.
//!
//! Each worker loop claims jobs with [`JobQueue::dequeue`], runs the
//! injected [`JobHandler`], and settles the outcome: `completed` on
//! success, `retrying -> pending` after a backoff for transient failures
//! with budget left, `failed` otherwise. A maintenance loop periodically
//! purges old records, reclaims stale claims, and logs queue stats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, ReviewdError};

use super::{JobQueue, JobStatus, RetryPolicy};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// The task executed for each claimed job.
///
/// Implementations receive the job's immutable params and return an opaque
/// success payload, or a classified [`ReviewdError`] whose kind drives the
/// retry decision.
#[async_trait]
pub trait JobHandler<P>: Send + Sync {
    async fn run(&self, params: &P) -> Result<serde_json::Value>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent polling loops
    pub worker_count: usize,
    /// Idle wait between polls of an empty queue (milliseconds)
    pub poll_interval_ms: u64,
    /// How often old job records are purged (milliseconds)
    pub cleanup_interval_ms: u64,
    /// Age past which job records are purged (milliseconds)
    pub max_job_age_ms: u64,
    /// How often queue stats are logged (milliseconds)
    pub stats_interval_ms: u64,
    /// Age past which a `processing` claim is considered stale (milliseconds)
    pub stale_processing_timeout_ms: u64,
    /// Retry policy applied to failed jobs
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            poll_interval_ms: 100,
            cleanup_interval_ms: 24 * 60 * 60 * 1000,
            max_job_age_ms: 7 * 24 * 60 * 60 * 1000,
            stats_interval_ms: 5 * 60 * 1000,
            stale_processing_timeout_ms: 10 * 60 * 1000,
            retry: RetryPolicy::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker Stats
// ═══════════════════════════════════════════════════════════════════════════════

/// Counters shared by all loops of one worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    processed: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    retried: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stats: WorkerStats,
}

impl WorkerHandle {
    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Signal all loops to stop and wait for in-flight work to settle.
    ///
    /// A job being processed finishes normally; a job waiting out its
    /// backoff is requeued immediately so it is never stranded.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        futures::future::join_all(self.tasks).await;
        tracing::info!("Worker stopped");
    }
}

/// Worker that processes jobs from a queue.
pub struct Worker<P> {
    queue: Arc<JobQueue<P>>,
    handler: Arc<dyn JobHandler<P>>,
    config: WorkerConfig,
}

impl<P> Worker<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a new worker over the given queue and task handler.
    pub fn new(
        queue: Arc<JobQueue<P>>,
        handler: Arc<dyn JobHandler<P>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Start the polling loops and the maintenance loop.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = WorkerStats::default();
        let mut tasks = Vec::with_capacity(self.config.worker_count + 1);

        tracing::info!(
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval_ms,
            "Worker started"
        );

        for index in 0..self.config.worker_count {
            tasks.push(tokio::spawn(poll_loop(
                index,
                self.queue.clone(),
                self.handler.clone(),
                self.config.clone(),
                stats.clone(),
                shutdown_rx.clone(),
            )));
        }

        tasks.push(tokio::spawn(maintenance_loop(
            self.queue.clone(),
            self.config.clone(),
            shutdown_rx,
        )));

        WorkerHandle {
            shutdown: shutdown_tx,
            tasks,
            stats,
        }
    }
}

async fn poll_loop<P>(
    index: usize,
    queue: Arc<JobQueue<P>>,
    handler: Arc<dyn JobHandler<P>>,
    config: WorkerConfig,
    stats: WorkerStats,
    mut shutdown: watch::Receiver<bool>,
) where
    P: Serialize + DeserializeOwned + Send + Sync,
{
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.dequeue().await {
            Ok(Some(job)) => {
                process_job(&queue, handler.as_ref(), &config, &stats, &mut shutdown, job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    // A dropped sender means the handle is gone; stop too
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(worker = index, error = %e, "Failed to poll queue");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(worker = index, "Poll loop exited");
}

async fn process_job<P>(
    queue: &JobQueue<P>,
    handler: &dyn JobHandler<P>,
    config: &WorkerConfig,
    stats: &WorkerStats,
    shutdown: &mut watch::Receiver<bool>,
    job: super::Job<P>,
) where
    P: Serialize + DeserializeOwned + Send + Sync,
{
    stats.active.fetch_add(1, Ordering::Relaxed);
    stats.processed.fetch_add(1, Ordering::Relaxed);
    counter!("jobs_processed_total").increment(1);

    let outcome = handler.run(&job.params).await;

    match outcome {
        Ok(result) => {
            if let Err(e) = queue
                .set_status(job.id, JobStatus::Completed, Some(result), None)
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to persist job completion");
            } else {
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
                counter!("jobs_succeeded_total").increment(1);
                tracing::info!(job_id = %job.id, retries = job.retry_count, "Job completed");
            }
        }
        Err(error) => {
            handle_failure(queue, config, stats, shutdown, &job, error).await;
        }
    }

    stats.active.fetch_sub(1, Ordering::Relaxed);
}

async fn handle_failure<P>(
    queue: &JobQueue<P>,
    config: &WorkerConfig,
    stats: &WorkerStats,
    shutdown: &mut watch::Receiver<bool>,
    job: &super::Job<P>,
    error: ReviewdError,
) where
    P: Serialize + DeserializeOwned + Send + Sync,
{
    let kind = error.kind();

    if config.retry.should_retry(kind, job.retry_count) {
        let scheduled = match queue.schedule_retry(job.id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to schedule retry");
                return;
            }
        };

        let delay = config.retry.delay_for_attempt(scheduled.retry_count);
        stats.retried.fetch_add(1, Ordering::Relaxed);
        counter!("jobs_retried_total").increment(1);
        tracing::warn!(
            job_id = %job.id,
            kind = %kind,
            retry_count = scheduled.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Job failed, retrying after backoff"
        );

        // Shutdown cuts the wait short but the requeue still happens, so
        // the job lands back in pending rather than dangling in retrying.
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }

        if let Err(e) = queue.requeue(job.id).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to requeue job");
        }
    } else {
        let message = error.sanitized_message();
        if let Err(e) = queue
            .set_status(job.id, JobStatus::Failed, None, Some(message))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist job failure");
            return;
        }
        stats.failed.fetch_add(1, Ordering::Relaxed);
        counter!("jobs_failed_total").increment(1);
        tracing::error!(
            job_id = %job.id,
            kind = %kind,
            retry_count = job.retry_count,
            "Job failed terminally"
        );
    }
}

async fn maintenance_loop<P>(
    queue: Arc<JobQueue<P>>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    P: Serialize + DeserializeOwned + Send + Sync,
{
    let max_job_age = Duration::from_millis(config.max_job_age_ms);
    let stale_timeout = Duration::from_millis(config.stale_processing_timeout_ms);

    let mut cleanup = tokio::time::interval(Duration::from_millis(config.cleanup_interval_ms));
    let mut stats = tokio::time::interval(Duration::from_millis(config.stats_interval_ms));

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = cleanup.tick() => {
                if let Err(e) = queue.purge_older_than(max_job_age).await {
                    tracing::error!(error = %e, "Job cleanup failed");
                }
                match queue.reclaim_stale(stale_timeout).await {
                    Ok(reclaimed) if reclaimed > 0 => {
                        counter!("jobs_reclaimed_total").increment(reclaimed);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Stale job reclaim failed"),
                }
            }
            _ = stats.tick() => {
                match queue.stats().await {
                    Ok(stats) => tracing::info!(
                        pending = stats.pending,
                        processing = stats.processing,
                        completed = stats.completed,
                        failed = stats.failed,
                        retrying = stats.retrying,
                        total = stats.total,
                        average_retries = stats.average_retries,
                        "Queue stats"
                    ),
                    Err(e) => tracing::error!(error = %e, "Failed to collect queue stats"),
                }
            }
        }
    }

    tracing::debug!("Maintenance loop exited");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
