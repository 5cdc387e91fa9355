//! End-to-end tests for the job pipeline.
//!
//! Tests cover:
//! - Enqueue/claim lifecycle and FIFO ordering
//! - Success, retry-then-success, and retry-exhaustion outcomes
//! - Terminal errors failing on the first attempt
//! - Error sanitization at the job boundary
//! - Multi-worker claiming without duplicate execution
//! - Graceful shutdown during a backoff wait

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use reviewd::error::{ErrorKind, Result, ReviewdError};
use reviewd::jobs::{
    Job, JobHandler, JobId, JobQueue, JobStatus, QueueConfig, RetryPolicy, Worker, WorkerConfig,
};
use reviewd::store::MemoryStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestParams {
    n: u32,
}

/// Handler that fails a scripted number of times before succeeding.
struct ScriptedHandler {
    kind: ErrorKind,
    message: String,
    failures_remaining: AtomicU32,
    executions: DashMap<u32, u32>,
}

impl ScriptedHandler {
    fn new(kind: ErrorKind, message: &str, failures: u32) -> Self {
        Self {
            kind,
            message: message.to_string(),
            failures_remaining: AtomicU32::new(failures),
            executions: DashMap::new(),
        }
    }

    fn succeeding() -> Self {
        Self::new(ErrorKind::Network, "unused", 0)
    }
}

#[async_trait]
impl JobHandler<TestParams> for ScriptedHandler {
    async fn run(&self, params: &TestParams) -> Result<serde_json::Value> {
        *self.executions.entry(params.n).or_insert(0) += 1;

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(ReviewdError::new(self.kind, self.message.clone()));
        }
        Ok(serde_json::json!({ "n": params.n }))
    }
}

fn fast_config(worker_count: usize, max_retries: u32) -> WorkerConfig {
    WorkerConfig {
        worker_count,
        poll_interval_ms: 10,
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            use_exponential_backoff: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn queue() -> Arc<JobQueue<TestParams>> {
    Arc::new(JobQueue::new(
        Arc::new(MemoryStore::new()),
        QueueConfig::default(),
    ))
}

async fn wait_for_terminal(
    queue: &JobQueue<TestParams>,
    id: JobId,
    timeout: Duration,
) -> Job<TestParams> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = queue.get(id).await.unwrap().expect("job record vanished");
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {} still {} after {:?}", id, job.status, timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Success Path
// ============================================================================

#[tokio::test]
async fn test_successful_job_reaches_completed() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::succeeding());
    let handle = Worker::new(queue.clone(), handler, fast_config(1, 3)).start();

    let job = queue.enqueue(TestParams { n: 7 }).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 0);

    let finished = wait_for_terminal(&queue, job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.params, TestParams { n: 7 });
    assert_eq!(finished.retry_count, 0);
    assert_eq!(finished.result, Some(serde_json::json!({ "n": 7 })));
    assert!(finished.error.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_jobs_complete_in_enqueue_order() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::succeeding());

    let first = queue.enqueue(TestParams { n: 1 }).await.unwrap();
    let second = queue.enqueue(TestParams { n: 2 }).await.unwrap();

    let handle = Worker::new(queue.clone(), handler, fast_config(1, 3)).start();

    let first = wait_for_terminal(&queue, first.id, Duration::from_secs(5)).await;
    let second = wait_for_terminal(&queue, second.id, Duration::from_secs(5)).await;
    assert!(first.updated_at <= second.updated_at);

    handle.shutdown().await;
}

// ============================================================================
// Retry Path
// ============================================================================

#[tokio::test]
async fn test_retryable_failures_then_success() {
    let queue = queue();
    // Fails exactly max_retries times, then succeeds
    let handler = Arc::new(ScriptedHandler::new(ErrorKind::Timeout, "upstream timed out", 3));
    let handle = Worker::new(queue.clone(), handler.clone(), fast_config(1, 3)).start();

    let job = queue.enqueue(TestParams { n: 1 }).await.unwrap();

    let finished = wait_for_terminal(&queue, job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.retry_count, 3);
    assert_eq!(*handler.executions.get(&1).unwrap(), 4);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_job() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::new(
        ErrorKind::UpstreamUnavailable,
        "service melting down",
        u32::MAX,
    ));
    let handle = Worker::new(queue.clone(), handler.clone(), fast_config(1, 2)).start();

    let job = queue.enqueue(TestParams { n: 1 }).await.unwrap();

    let finished = wait_for_terminal(&queue, job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.retry_count, 2);
    let error = finished.error.expect("failed job carries an error");
    assert!(!error.is_empty());
    // First attempt plus two retries
    assert_eq!(*handler.executions.get(&1).unwrap(), 3);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_terminal_error_fails_on_first_attempt() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::new(
        ErrorKind::Validation,
        "pull request has no diff",
        u32::MAX,
    ));
    let handle = Worker::new(queue.clone(), handler.clone(), fast_config(1, 3)).start();

    let job = queue.enqueue(TestParams { n: 1 }).await.unwrap();

    let finished = wait_for_terminal(&queue, job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.retry_count, 0);
    assert_eq!(*handler.executions.get(&1).unwrap(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_persisted_error_is_sanitized() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::new(
        ErrorKind::Unauthorized,
        "rejected with token=ghp_secret123 for admin@corp.example",
        u32::MAX,
    ));
    let handle = Worker::new(queue.clone(), handler, fast_config(1, 3)).start();

    let job = queue.enqueue(TestParams { n: 1 }).await.unwrap();

    let finished = wait_for_terminal(&queue, job.id, Duration::from_secs(5)).await;
    let error = finished.error.expect("failed job carries an error");
    assert!(!error.contains("ghp_secret123"));
    assert!(!error.contains("admin@corp.example"));
    assert!(!error.is_empty());

    handle.shutdown().await;
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_workers_execute_each_job_once() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::succeeding());

    let mut ids = Vec::new();
    for n in 0..20 {
        ids.push(queue.enqueue(TestParams { n }).await.unwrap().id);
    }

    let handle = Worker::new(queue.clone(), handler.clone(), fast_config(4, 3)).start();

    for id in &ids {
        let finished = wait_for_terminal(&queue, *id, Duration::from_secs(10)).await;
        assert_eq!(finished.status, JobStatus::Completed);
    }

    // Every job executed exactly once despite four competing workers
    assert_eq!(handler.executions.len(), 20);
    for entry in handler.executions.iter() {
        assert_eq!(*entry.value(), 1, "job {} executed more than once", entry.key());
    }

    handle.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_during_backoff_requeues_job() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::new(ErrorKind::Network, "flaky", u32::MAX));

    // Long backoff so the job is parked in its retry wait when we stop
    let config = WorkerConfig {
        worker_count: 1,
        poll_interval_ms: 10,
        retry: RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let handle = Worker::new(queue.clone(), handler, config).start();

    let job = queue.enqueue(TestParams { n: 1 }).await.unwrap();

    // Wait until the first failure has been recorded
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = queue.get(job.id).await.unwrap().unwrap();
        if current.retry_count > 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never failed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.shutdown().await;

    // The backoff wait was cut short but the job was requeued, not stranded
    let parked = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(parked.status, JobStatus::Pending);
    assert_eq!(parked.retry_count, 1);
}

#[tokio::test]
async fn test_idle_worker_shuts_down_promptly() {
    let queue = queue();
    let handler = Arc::new(ScriptedHandler::succeeding());
    let handle = Worker::new(queue.clone(), handler, fast_config(2, 3)).start();

    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown did not complete in time");
}
