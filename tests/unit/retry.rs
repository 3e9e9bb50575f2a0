//! Unit tests for the retrying executor

use listing_exporter::exporter::{RateLimiter, RetryPolicy, RetryingExecutor};
use listing_exporter::fetcher::FetcherError;
use listing_exporter::metrics::RequestCounters;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn executor() -> RetryingExecutor {
    RetryingExecutor::new(
        RateLimiter::per_second(100).unwrap(),
        Arc::new(RequestCounters::new()),
    )
}

fn server_error() -> FetcherError {
    FetcherError::ServerError {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_retryable_error_exhausts_three_attempts() {
    let executor = executor();
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result: Result<(), _> = executor
        .execute("listings", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;

    assert!(matches!(
        result,
        Err(FetcherError::ServerError { status: 503, .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // 2s before the second attempt, 4s before the third
    assert!(start.elapsed() >= Duration::from_secs(6));

    let snapshot = executor.counters().snapshot();
    assert_eq!(snapshot.requests, 3);
    assert_eq!(snapshot.errors, 3);
    assert_eq!(snapshot.retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    let executor = executor();
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = executor
        .execute("listing_detail", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FetcherError::ClientError {
                    status: 404,
                    message: "Not Found".to_string(),
                    errors: Vec::new(),
                })
            }
        })
        .await;

    assert!(matches!(
        result,
        Err(FetcherError::ClientError { status: 404, .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.counters().snapshot().retries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_then_success() {
    let executor = executor();
    let calls = AtomicU32::new(0);

    let result = executor
        .execute("listings", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(FetcherError::RateLimitExceeded)
                } else {
                    Ok(call)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
    let snapshot = executor.counters().snapshot();
    assert_eq!(snapshot.requests, 2);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_timing_between_attempts() {
    let executor = executor();
    let attempts = std::sync::Mutex::new(Vec::new());

    let _: Result<(), _> = executor
        .execute("listings", || {
            attempts.lock().unwrap().push(Instant::now());
            async { Err(FetcherError::Timeout("request timed out".to_string())) }
        })
        .await;

    let attempts = attempts.into_inner().unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts[1].duration_since(attempts[0]) >= Duration::from_secs(2));
    assert!(attempts[2].duration_since(attempts[1]) >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy() {
    let executor = executor().with_policy(RetryPolicy::new(5, Duration::from_millis(10)));
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = executor
        .execute("listings", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetcherError::ConnectionFailed("reset".to_string())) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_every_attempt_takes_a_rate_limit_slot() {
    let limiter = RateLimiter::per_second(100).unwrap();
    let executor = RetryingExecutor::new(limiter.clone(), Arc::new(RequestCounters::new()));

    let _: Result<(), _> = executor
        .execute("listings", || async { Err(server_error()) })
        .await;

    assert_eq!(limiter.issued(), 3);
}
