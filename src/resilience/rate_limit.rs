//! Fixed-window rate limiting over the shared key-value store.
//!
//! Each caller key gets a counter per discrete time bucket
//! (`"<prefix>:<key>:<window_id>"`, `window_id = now / window`). Because
//! counting goes through the same store as the job queue, every worker and
//! process shares the same windows. The limiter only reports; it never
//! blocks, queues, or errors — when the store is down it fails open so an
//! infrastructure fault cannot stop traffic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::store::KvStore;

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Window width in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window per key
    pub max_requests: u64,
    /// Key prefix in the store
    pub key_prefix: String,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 60,
            key_prefix: "ratelimit".to_string(),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request fits in the current window
    pub allowed: bool,
    /// The configured per-window limit
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends and the counter resets
    pub reset_at: DateTime<Utc>,
}

/// Fixed-window counting rate limiter.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    fn window_end(&self, window_id: i64) -> DateTime<Utc> {
        let end_ms = (window_id + 1) * self.config.window_ms as i64;
        Utc.timestamp_millis_opt(end_ms).single().unwrap_or_else(Utc::now)
    }

    /// Count this request against `key`'s current window and report the
    /// admission decision. Never fails: a store fault logs, records a
    /// metric, and allows the request.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let now_ms = Utc::now().timestamp_millis();
        let window_id = now_ms / self.config.window_ms as i64;
        let counter_key = format!("{}:{}:{}", self.config.key_prefix, key, window_id);

        let count = match self.store.incr(&counter_key).await {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                counter!("rate_limit_store_errors_total").increment(1);
                tracing::warn!(key = %key, error = %e, "Rate limit store fault, failing open");
                return RateLimitDecision {
                    allowed: true,
                    limit: self.config.max_requests,
                    remaining: self.config.max_requests,
                    reset_at: self.window_end(window_id),
                };
            }
        };

        if count == 1 {
            let ttl = Duration::from_millis(self.config.window_ms);
            if let Err(e) = self.store.expire(&counter_key, ttl).await {
                tracing::warn!(key = %key, error = %e, "Failed to set rate limit window expiry");
            }
        }

        let allowed = count <= self.config.max_requests;
        let remaining = self.config.max_requests.saturating_sub(count);

        counter!("rate_limit_checks_total", "allowed" => allowed.to_string()).increment(1);
        if !allowed {
            tracing::debug!(
                key = %key,
                count = count,
                limit = self.config.max_requests,
                "Rate limit window exhausted"
            );
        }

        RateLimitDecision {
            allowed,
            limit: self.config.max_requests,
            remaining,
            reset_at: self.window_end(window_id),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
