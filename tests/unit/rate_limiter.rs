//! Unit tests for the sliding-window rate limiter

use futures::future::join_all;
use listing_exporter::exporter::{RateLimitError, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Largest number of grants falling inside any window of `window` length
fn max_grants_in_any_window(mut grants: Vec<Instant>, window: Duration) -> usize {
    grants.sort();
    let mut max = 0;
    for (i, start) in grants.iter().enumerate() {
        let in_window = grants[i..]
            .iter()
            .take_while(|t| t.duration_since(*start) < window)
            .count();
        max = max.max(in_window);
    }
    max
}

#[test]
fn test_rate_limiter_rejects_invalid_configuration() {
    assert!(matches!(
        RateLimiter::per_second(0),
        Err(RateLimitError::InvalidRate(0))
    ));
    assert!(matches!(
        RateLimiter::new(10, Duration::ZERO),
        Err(RateLimitError::InvalidWindow)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_burst_never_exceeds_rate_in_any_window() {
    let limiter = RateLimiter::per_second(5).unwrap();

    // 23 callers arrive at once
    let slots = join_all((0..23).map(|_| limiter.acquire())).await;
    let grants: Vec<Instant> = slots.iter().map(|slot| slot.granted_at()).collect();

    assert_eq!(grants.len(), 23);
    assert!(max_grants_in_any_window(grants, Duration::from_secs(1)) <= 5);
    assert_eq!(limiter.issued(), 23);
}

#[tokio::test(start_paused = true)]
async fn test_grants_are_spaced_evenly() {
    let limiter = RateLimiter::per_second(4).unwrap();

    let mut previous = limiter.acquire().await.granted_at();
    for _ in 0..7 {
        let next = limiter.acquire().await.granted_at();
        assert!(next.duration_since(previous) >= Duration::from_millis(250));
        previous = next;
    }
}

#[tokio::test(start_paused = true)]
async fn test_callers_are_served_in_arrival_order() {
    let limiter = RateLimiter::per_second(3).unwrap();

    // join_all polls these in order, so lock() is requested in index order
    let slots = join_all((0..12).map(|_| limiter.acquire())).await;

    for (index, slot) in slots.iter().enumerate() {
        assert_eq!(slot.sequence(), index as u64 + 1);
    }
    for pair in slots.windows(2) {
        assert!(pair[1].granted_at() > pair[0].granted_at());
    }
}

#[tokio::test(start_paused = true)]
async fn test_limiter_shared_across_tasks() {
    let limiter = RateLimiter::per_second(10).unwrap();
    let grants = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = limiter.clone();
        let grants = Arc::clone(&grants);
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                let slot = limiter.acquire().await;
                grants.lock().await.push(slot.granted_at());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let grants = grants.lock().await.clone();
    assert_eq!(grants.len(), 40);
    assert!(max_grants_in_any_window(grants, Duration::from_secs(1)) <= 10);
}

#[tokio::test(start_paused = true)]
async fn test_idle_limiter_grants_immediately() {
    let limiter = RateLimiter::per_second(2).unwrap();
    limiter.acquire().await;

    // Let the window drain completely
    tokio::time::sleep(Duration::from_secs(5)).await;

    let before = Instant::now();
    let slot = limiter.acquire().await;
    assert_eq!(slot.granted_at(), before);
}
