//! Circuit breaker for upstream failure handling.
//!
//! A per-dependency 3-state gate: `closed` passes calls through and counts
//! failures, `open` rejects immediately without attempting the call, and
//! `half_open` lets probe calls through to test recovery. Transitions are
//! evaluated lazily on each call; no timers run in the background.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, ReviewdError};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls allowed
    Closed,
    /// Failing fast, calls rejected without being attempted
    Open,
    /// Probing recovery with live calls
    HalfOpen,
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing (milliseconds)
    pub reset_timeout_ms: u64,
    /// How long an unresolved half-open probe may dangle before the
    /// breaker re-opens (milliseconds)
    pub half_open_timeout_ms: u64,
    /// Consecutive half-open successes required to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_timeout_ms: 30_000,
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    half_open_since: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
            half_open_since: None,
        }
    }
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    /// Name of the protected dependency, for logs and metrics
    dependency: String,
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker guarding the named dependency.
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            state: RwLock::new(BreakerState::new()),
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }

    /// Run a call through the breaker.
    ///
    /// When the breaker is open and its reset timeout has not elapsed, the
    /// call is not invoked and a `CircuitOpen` error is returned
    /// immediately.
    pub async fn execute<F, Fut, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.can_execute() {
            counter!("circuit_breaker_rejections_total", "dependency" => self.dependency.clone())
                .increment(1);
            return Err(ReviewdError::new(
                ErrorKind::CircuitOpen,
                format!("Circuit breaker open for {}", self.dependency),
            ));
        }

        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Check if a call is allowed, performing lazy state transitions.
    pub fn can_execute(&self) -> bool {
        let mut state = self.state.write();

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let reset_timeout = Duration::from_millis(self.config.reset_timeout_ms);
                let elapsed = state
                    .last_failure
                    .map(|at| at.elapsed() >= reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    state.state = CircuitState::HalfOpen;
                    state.successes = 0;
                    state.half_open_since = Some(Instant::now());
                    tracing::info!(
                        dependency = %self.dependency,
                        "Circuit breaker transitioning to half-open"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let probe_timeout = Duration::from_millis(self.config.half_open_timeout_ms);
                let dangling = state
                    .half_open_since
                    .map(|at| at.elapsed() >= probe_timeout)
                    .unwrap_or(false);
                if dangling {
                    // The probe never resolved; treat it as a failed recovery.
                    state.state = CircuitState::Open;
                    state.last_failure = Some(Instant::now());
                    state.half_open_since = None;
                    tracing::warn!(
                        dependency = %self.dependency,
                        "Half-open probe timed out, re-opening circuit breaker"
                    );
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.write();

        match state.state {
            CircuitState::HalfOpen => {
                state.successes += 1;
                if state.successes >= self.config.success_threshold {
                    *state = BreakerState::new();
                    counter!("circuit_breaker_closed_total", "dependency" => self.dependency.clone())
                        .increment(1);
                    tracing::info!(
                        dependency = %self.dependency,
                        "Circuit breaker closed after successful recovery"
                    );
                }
            }
            CircuitState::Closed => {
                // A single success clears the failure streak
                state.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.write();

        state.failures += 1;
        state.last_failure = Some(Instant::now());

        let should_open = match state.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            state.state = CircuitState::Open;
            state.half_open_since = None;
            counter!("circuit_breaker_opened_total", "dependency" => self.dependency.clone())
                .increment(1);
            tracing::warn!(
                dependency = %self.dependency,
                failures = state.failures,
                threshold = self.config.failure_threshold,
                "Circuit breaker opened"
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
