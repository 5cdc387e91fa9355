//! Resilience layer protecting calls to unreliable upstreams.
//!
//! - **Circuit breaker**: per-dependency health gate that fails fast while
//!   an upstream is unhealthy and probes for recovery
//! - **Rate limiter**: fixed-window admission control shared across
//!   processes through the key-value store

pub mod circuit_breaker;
pub mod rate_limit;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limit::{RateLimitDecision, RateLimiter, RateLimiterConfig};
