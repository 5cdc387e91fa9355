//! # reviewd
//!
//! The asynchronous core of a pull-request review automation service:
//! request acceptance is decoupled from the long-running, failure-prone
//! upstream work by a persisted job queue, polling workers with bounded
//! retries and exponential backoff, and a resilience layer that protects
//! every upstream call.
//!
//! ## Architecture
//!
//! - **Store**: key-value store abstraction (in-memory and Redis backends)
//! - **Jobs**: persisted job records, FIFO queue, and polling workers with
//!   a retry state machine and stale-claim reclaim
//! - **Resilience**: per-dependency circuit breakers and a fixed-window
//!   rate limiter shared through the store
//! - **Cache**: TTL-based memoization of idempotent upstream results
//! - **Review**: the business task — fetch a PR diff, run the review
//!   prompt through the model API, post the result as a comment

pub mod cache;
pub mod config;
pub mod error;
pub mod jobs;
pub mod resilience;
pub mod review;
pub mod store;
pub mod telemetry;

pub use error::{ErrorKind, Result, ReviewdError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{cache_key, Cache, CacheNamespace};
    pub use crate::config::Config;
    pub use crate::error::{ErrorKind, Result, ReviewdError};
    pub use crate::jobs::{
        Job, JobHandler, JobId, JobQueue, JobStatus, QueueConfig, QueueStats, RetryPolicy,
        Worker, WorkerConfig, WorkerHandle, WorkerStats,
    };
    pub use crate::resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitDecision, RateLimiter,
        RateLimiterConfig,
    };
    pub use crate::review::{
        Completion, CompletionModel, CompletionOptions, GithubClient, GithubConfig,
        HttpCompletionModel, ModelConfig, PullRequest, ReviewParams, ReviewService,
        SourceControl,
    };
    pub use crate::store::{KvStore, MemoryStore, RedisStore};
}
