//! Tests for circuit breaker state transitions.
//!
//! Tests cover:
//! - State transitions (Closed -> Open -> HalfOpen -> Closed)
//! - Failure threshold triggering
//! - Recovery timeout behavior
//! - Success threshold during half-open probing
//! - Fail-fast execute semantics
//! - Concurrent access scenarios

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reviewd::error::{ErrorKind, ReviewdError};
use reviewd::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

fn config(
    failure_threshold: u32,
    reset_timeout_ms: u64,
    success_threshold: u32,
) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        reset_timeout_ms,
        half_open_timeout_ms: 60_000,
        success_threshold,
    }
}

// ============================================================================
// Creation and Closed-State Behavior
// ============================================================================

#[test]
fn test_breaker_starts_closed() {
    let breaker = CircuitBreaker::new("upstream", CircuitBreakerConfig::default());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.can_execute());
}

#[test]
fn test_various_thresholds_start_closed() {
    for threshold in [1, 3, 5, 10, 100] {
        let breaker = CircuitBreaker::new("upstream", config(threshold, 30_000, 1));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }
}

#[test]
fn test_failures_below_threshold_stay_closed() {
    let breaker = CircuitBreaker::new("upstream", config(3, 30_000, 1));

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.can_execute());
}

#[test]
fn test_threshold_trips_breaker_open() {
    let breaker = CircuitBreaker::new("upstream", config(3, 30_000, 1));

    breaker.record_failure();
    breaker.record_failure();
    breaker.record_failure();

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_execute());
}

#[test]
fn test_single_success_clears_failure_streak() {
    let breaker = CircuitBreaker::new("upstream", config(3, 30_000, 1));

    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();

    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

// ============================================================================
// Recovery: Open -> HalfOpen -> Closed
// ============================================================================

#[test]
fn test_open_breaker_stays_open_before_reset_timeout() {
    let breaker = CircuitBreaker::new("upstream", config(1, 60_000, 1));
    breaker.record_failure();

    assert!(!breaker.can_execute());
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn test_reset_timeout_allows_half_open_probe() {
    let breaker = CircuitBreaker::new("upstream", config(1, 20, 1));
    breaker.record_failure();

    thread::sleep(Duration::from_millis(30));
    assert!(breaker.can_execute());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[test]
fn test_success_threshold_closes_from_half_open() {
    let breaker = CircuitBreaker::new("upstream", config(1, 20, 3));
    breaker.record_failure();

    thread::sleep(Duration::from_millis(30));
    assert!(breaker.can_execute());

    breaker.record_success();
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn test_failure_during_half_open_reopens() {
    let breaker = CircuitBreaker::new("upstream", config(1, 20, 2));
    breaker.record_failure();

    thread::sleep(Duration::from_millis(30));
    assert!(breaker.can_execute());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_execute());
}

#[test]
fn test_full_recovery_cycle() {
    let breaker = CircuitBreaker::new("upstream", config(2, 20, 1));

    // Trip it
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Recover
    thread::sleep(Duration::from_millis(30));
    assert!(breaker.can_execute());
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Back to normal accounting: takes the full threshold to trip again
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

// ============================================================================
// Execute Semantics
// ============================================================================

#[tokio::test]
async fn test_execute_passes_through_success() {
    let breaker = CircuitBreaker::new("upstream", CircuitBreakerConfig::default());

    let value = breaker
        .execute(|| async { Ok::<_, ReviewdError>("ok") })
        .await
        .unwrap();
    assert_eq!(value, "ok");
}

#[tokio::test]
async fn test_execute_fails_fast_without_calling_upstream() {
    let breaker = CircuitBreaker::new("upstream", config(1, 60_000, 1));
    let calls = Arc::new(AtomicU32::new(0));

    let counted = calls.clone();
    let _ = breaker
        .execute(|| async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ReviewdError::new(ErrorKind::Network, "down"))
        })
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let counted = calls.clone();
    let err = breaker
        .execute(|| async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok::<(), _>(())
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_execute_propagates_underlying_error() {
    let breaker = CircuitBreaker::new("upstream", CircuitBreakerConfig::default());

    let err = breaker
        .execute(|| async { Err::<(), _>(ReviewdError::new(ErrorKind::Timeout, "slow")) })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

// ============================================================================
// Concurrent Access
// ============================================================================

#[test]
fn test_concurrent_failures_trip_exactly_once() {
    let breaker = Arc::new(CircuitBreaker::new("upstream", config(50, 30_000, 1)));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let breaker = breaker.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    breaker.record_failure();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // 100 failures against a threshold of 50: open, and consistent
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_execute());
}

#[test]
fn test_concurrent_mixed_outcomes_keep_state_valid() {
    let breaker = Arc::new(CircuitBreaker::new("upstream", config(1000, 30_000, 1)));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let breaker = breaker.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    if i % 2 == 0 {
                        breaker.record_failure();
                    } else {
                        breaker.record_success();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Successes keep resetting the streak well below the threshold
    assert_eq!(breaker.state(), CircuitState::Closed);
}
