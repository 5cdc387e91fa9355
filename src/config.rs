//! Configuration management.
//!
//! Settings load from the environment with the `REVIEWD` prefix and `__`
//! separator (e.g. `REVIEWD__WORKER__WORKER_COUNT=4`), optionally layered
//! over a config file. Each section converts into the owning module's
//! config type in the binary's wiring code.

use serde::Deserialize;

use crate::error::ErrorKind;
use crate::jobs::{QueueConfig, RetryPolicy, WorkerConfig};
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig};
use crate::review::{GithubConfig, ModelConfig};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,

    /// Queue key layout
    #[serde(default)]
    pub queue: QueueSettings,

    /// Worker loop configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Retry policy
    #[serde(default)]
    pub retry: RetrySettings,

    /// Circuit breaker for the source-control upstream
    #[serde(default)]
    pub github_breaker: BreakerSettings,

    /// Circuit breaker for the model upstream
    #[serde(default)]
    pub model_breaker: BreakerSettings,

    /// Rate limiter configuration
    #[serde(default)]
    pub rate_limiter: RateLimiterSettings,

    /// GitHub client configuration
    #[serde(default)]
    pub github: GithubSettings,

    /// Model client configuration
    #[serde(default)]
    pub model: ModelSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    #[serde(default = "default_jobs_key")]
    pub jobs_key: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            queue_key: default_queue_key(),
            jobs_key: default_jobs_key(),
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            queue_key: self.queue_key.clone(),
            jobs_key: self.jobs_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    #[serde(default = "default_max_job_age_ms")]
    pub max_job_age_ms: u64,

    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    #[serde(default = "default_stale_processing_timeout_ms")]
    pub stale_processing_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            max_job_age_ms: default_max_job_age_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            stale_processing_timeout_ms: default_stale_processing_timeout_ms(),
        }
    }
}

impl WorkerSettings {
    pub fn to_worker_config(&self, retry: RetryPolicy) -> WorkerConfig {
        WorkerConfig {
            worker_count: self.worker_count,
            poll_interval_ms: self.poll_interval_ms,
            cleanup_interval_ms: self.cleanup_interval_ms,
            max_job_age_ms: self.max_job_age_ms,
            stats_interval_ms: self.stats_interval_ms,
            stale_processing_timeout_ms: self.stale_processing_timeout_ms,
            retry,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_use_exponential_backoff")]
    pub use_exponential_backoff: bool,

    /// Error kinds eligible for retry
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            use_exponential_backoff: default_use_exponential_backoff(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: std::time::Duration::from_millis(self.base_delay_ms),
            max_delay: std::time::Duration::from_millis(self.max_delay_ms),
            use_exponential_backoff: self.use_exponential_backoff,
            retryable_errors: self.retryable_errors.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_half_open_timeout_ms")]
    pub half_open_timeout_ms: u64,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_timeout_ms: default_half_open_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout_ms: self.reset_timeout_ms,
            half_open_timeout_ms: self.half_open_timeout_ms,
            success_threshold: self.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterSettings {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    #[serde(default = "default_rate_limit_prefix")]
    pub key_prefix: String,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            key_prefix: default_rate_limit_prefix(),
        }
    }
}

impl RateLimiterSettings {
    pub fn to_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            window_ms: self.window_ms,
            max_requests: self.max_requests,
            key_prefix: self.key_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubSettings {
    #[serde(default = "default_github_api_base")]
    pub api_base: String,

    /// Personal access token or installation token
    pub token: Option<String>,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_base: default_github_api_base(),
            token: None,
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl GithubSettings {
    pub fn to_github_config(&self) -> GithubConfig {
        GithubConfig {
            api_base: self.api_base.clone(),
            token: self.token.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// Messages endpoint base URL
    #[serde(default)]
    pub api_base: String,

    /// API key
    #[serde(default)]
    pub api_key: String,

    /// Default model id
    #[serde(default)]
    pub model: String,

    #[serde(default = "default_model_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_model_temperature")]
    pub temperature: f32,

    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_tokens: default_model_max_tokens(),
            temperature: default_model_temperature(),
            timeout_ms: default_model_timeout_ms(),
        }
    }
}

impl ModelSettings {
    pub fn to_model_config(&self) -> ModelConfig {
        ModelConfig {
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout_ms: self.timeout_ms,
        }
    }
}

// Default value functions
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_queue_key() -> String { "analysis:queue".to_string() }
fn default_jobs_key() -> String { "analysis:jobs".to_string() }
fn default_worker_count() -> usize { 1 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_cleanup_interval_ms() -> u64 { 24 * 60 * 60 * 1000 }
fn default_max_job_age_ms() -> u64 { 7 * 24 * 60 * 60 * 1000 }
fn default_stats_interval_ms() -> u64 { 5 * 60 * 1000 }
fn default_stale_processing_timeout_ms() -> u64 { 10 * 60 * 1000 }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_use_exponential_backoff() -> bool { true }
fn default_retryable_errors() -> Vec<ErrorKind> {
    vec![
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::RateLimited,
        ErrorKind::UpstreamUnavailable,
        ErrorKind::CircuitOpen,
    ]
}
fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout_ms() -> u64 { 30_000 }
fn default_half_open_timeout_ms() -> u64 { 30_000 }
fn default_success_threshold() -> u32 { 2 }
fn default_window_ms() -> u64 { 60_000 }
fn default_max_requests() -> u64 { 60 }
fn default_rate_limit_prefix() -> String { "ratelimit".to_string() }
fn default_github_api_base() -> String { "https://api.github.com".to_string() }
fn default_http_timeout_ms() -> u64 { 30_000 }
fn default_model_max_tokens() -> u32 { 4096 }
fn default_model_temperature() -> f32 { 0.2 }
fn default_model_timeout_ms() -> u64 { 120_000 }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("REVIEWD").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("REVIEWD").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
