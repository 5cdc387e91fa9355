//! Persisted job store and FIFO queue over the key-value store.
//!
//! Job records live under `"<jobs_key>:<id>"`; the pending order is a list
//! under `"<queue_key>"`. Ids are pushed to the tail and popped from the
//! head, so jobs are dequeued in enqueue order and retried jobs re-enter at
//! the tail behind fresh work.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, ReviewdError};
use crate::store::KvStore;

use super::{Job, JobId, JobStatus};

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Key of the pending-order list
    pub queue_key: String,
    /// Prefix under which job records are stored
    pub jobs_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_key: "analysis:queue".to_string(),
            jobs_key: "analysis:jobs".to_string(),
        }
    }
}

/// Aggregated queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub total: u64,
    /// Mean `retry_count` across all persisted jobs (0 when empty)
    pub average_retries: f64,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// Persisted job store plus pending-order queue.
pub struct JobQueue<P> {
    store: Arc<dyn KvStore>,
    config: QueueConfig,
    _params: PhantomData<fn() -> P>,
}

impl<P> JobQueue<P>
where
    P: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a new queue over the given store.
    pub fn new(store: Arc<dyn KvStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            _params: PhantomData,
        }
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}:{}", self.config.jobs_key, id)
    }

    async fn save(&self, job: &Job<P>) -> Result<()> {
        let serialized = serde_json::to_string(job)?;
        self.store.set(&self.job_key(job.id), &serialized, None).await
    }

    /// Create a pending job, persist it, and append its id to the queue.
    ///
    /// Persistence errors propagate; a job is never silently dropped.
    pub async fn enqueue(&self, params: P) -> Result<Job<P>> {
        let job = Job::new(params);
        self.save(&job).await?;
        self.store
            .push(&self.config.queue_key, &job.id.to_string())
            .await?;

        tracing::info!(job_id = %job.id, "Job enqueued");
        Ok(job)
    }

    /// Fetch the current persisted state of a job.
    pub async fn get(&self, id: JobId) -> Result<Option<Job<P>>> {
        match self.store.get(&self.job_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn load(&self, id: JobId) -> Result<Job<P>> {
        self.get(id).await?.ok_or_else(|| {
            ReviewdError::new(ErrorKind::NotFound, format!("Unknown job id {}", id))
        })
    }

    /// Update a job's status, optionally attaching a result or error.
    ///
    /// Fails with a `NotFound` error for unknown ids and always refreshes
    /// `updated_at`.
    pub async fn set_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Job<P>> {
        let mut job = self.load(id).await?;

        if !job.status.can_transition_to(status) && job.status != status {
            tracing::warn!(
                job_id = %id,
                from = %job.status,
                to = %status,
                "Unexpected job status transition"
            );
        }

        job.status = status;
        if let Some(result) = result {
            job.result = Some(result);
        }
        if let Some(error) = error {
            job.error = Some(error);
        }
        job.touch();
        self.save(&job).await?;
        Ok(job)
    }

    /// Pop the next pending job and claim it for processing.
    ///
    /// Returns `None` when the queue is empty. The pop itself is atomic at
    /// the store, so an id reaches exactly one caller; the status check
    /// below is the secondary claim guard against ids whose record was
    /// mutated or purged while queued.
    pub async fn dequeue(&self) -> Result<Option<Job<P>>> {
        loop {
            let Some(raw_id) = self.store.pop(&self.config.queue_key).await? else {
                return Ok(None);
            };

            let Some(id) = JobId::parse(&raw_id) else {
                tracing::warn!(raw_id = %raw_id, "Discarding malformed id from queue");
                continue;
            };

            let Some(mut job) = self.get(id).await? else {
                tracing::warn!(job_id = %id, "Queued job record missing, skipping");
                continue;
            };

            if job.status != JobStatus::Pending {
                tracing::warn!(job_id = %id, status = %job.status, "Skipping non-pending queued job");
                continue;
            }

            job.status = JobStatus::Processing;
            job.touch();
            self.save(&job).await?;

            tracing::debug!(job_id = %id, "Job claimed");
            return Ok(Some(job));
        }
    }

    /// Record that a job will be retried: increments `retry_count` and
    /// parks the job in `Retrying`. Pure state update; the timed wait and
    /// re-enqueue are the worker's concern.
    pub async fn schedule_retry(&self, id: JobId) -> Result<Job<P>> {
        let mut job = self.load(id).await?;
        job.retry_count += 1;
        job.status = JobStatus::Retrying;
        job.touch();
        self.save(&job).await?;
        Ok(job)
    }

    /// Return a job to the pending state and push its id to the queue tail.
    pub async fn requeue(&self, id: JobId) -> Result<()> {
        let mut job = self.load(id).await?;
        job.status = JobStatus::Pending;
        job.touch();
        self.save(&job).await?;
        self.store.push(&self.config.queue_key, &id.to_string()).await?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<Job<P>>> {
        let pattern = format!("{}:*", self.config.jobs_key);
        let keys = self.store.keys(&pattern).await?;

        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.store.get(&key).await? {
                match serde_json::from_str(&raw) {
                    Ok(job) => jobs.push(job),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Skipping undecodable job record")
                    }
                }
            }
        }
        Ok(jobs)
    }

    /// Scan all persisted jobs and aggregate counts per status.
    pub async fn stats(&self) -> Result<QueueStats> {
        let jobs = self.scan().await?;

        let mut stats = QueueStats::default();
        let mut retries_total = 0u64;
        for job in &jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Retrying => stats.retrying += 1,
            }
            retries_total += u64::from(job.retry_count);
        }
        stats.total = jobs.len() as u64;
        stats.average_retries = if stats.total > 0 {
            retries_total as f64 / stats.total as f64
        } else {
            0.0
        };
        Ok(stats)
    }

    /// Delete job records whose `updated_at` is strictly older than
    /// `max_age` ago, regardless of status. Coarse retention, not a
    /// correctness mechanism.
    pub async fn purge_older_than(&self, max_age: Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now() - to_chrono(max_age);

        let jobs = self.scan().await?;
        let expired: Vec<String> = jobs
            .iter()
            .filter(|job| job.updated_at < cutoff)
            .map(|job| self.job_key(job.id))
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }
        let removed = self.store.del(&expired).await?;
        tracing::info!(removed = removed, "Purged old job records");
        Ok(removed)
    }

    /// Requeue `Processing` jobs whose claim has gone stale.
    ///
    /// A worker crash between claim and completion would otherwise park the
    /// job in `Processing` forever; this restores at-least-once delivery.
    pub async fn reclaim_stale(&self, processing_timeout: Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now() - to_chrono(processing_timeout);

        let jobs = self.scan().await?;
        let mut reclaimed = 0;
        for job in jobs {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                tracing::warn!(job_id = %job.id, "Reclaiming stale processing job");
                self.requeue(job.id).await?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
