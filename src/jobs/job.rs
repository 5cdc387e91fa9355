//! Job records, status state machine, and retry policy.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string representation.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the queue
    Pending,
    /// Job has been claimed by a worker
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed terminally (non-retryable error or retry budget exhausted)
    Failed,
    /// Job failed with a retryable error and is waiting out its backoff
    Retrying,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check whether moving to `next` is a valid transition.
    ///
    /// `Processing -> Pending` is the stale-claim reclaim path: a worker
    /// crash leaves the job parked in `Processing`, and the maintenance
    /// loop requeues it.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Retrying)
                | (Self::Processing, Self::Pending)
                | (Self::Retrying, Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A unit of deferred work, persisted in the job store.
///
/// `P` is the caller-supplied task parameter payload; the queue and worker
/// never inspect it beyond (de)serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<P> {
    /// Unique job identifier
    pub id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Task arguments, immutable after creation
    pub params: P,
    /// Success payload, present only when completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Sanitized failure message, present only when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of retry attempts so far
    pub retry_count: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job was last mutated
    pub updated_at: DateTime<Utc>,
}

impl<P> Job<P> {
    /// Create a fresh pending job.
    pub fn new(params: P) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            params,
            result: None,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the `updated_at` timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Ceiling applied to every computed delay
    pub max_delay: Duration,
    /// Double the delay on each attempt; fixed `base_delay` otherwise
    pub use_exponential_backoff: bool,
    /// Error kinds eligible for retry; everything else fails terminally
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            use_exponential_backoff: true,
            retryable_errors: vec![
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
                ErrorKind::UpstreamUnavailable,
                ErrorKind::CircuitOpen,
            ],
        }
    }
}

impl RetryPolicy {
    /// Check if the error kind is in the retryable allow-list.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_errors.contains(&kind)
    }

    /// Decide whether a job that has already been retried `retry_count`
    /// times should be retried again after failing with `kind`.
    pub fn should_retry(&self, kind: ErrorKind, retry_count: u32) -> bool {
        self.is_retryable(kind) && retry_count < self.max_retries
    }

    /// Backoff delay for a 1-based retry attempt:
    /// `min(base_delay * 2^(attempt-1), max_delay)` when exponential,
    /// a fixed `base_delay` otherwise.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
