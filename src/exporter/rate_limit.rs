//! Sliding-window rate limiting
//!
//! Admission control for every outbound request. Grants are recorded in a
//! trailing window; a caller is admitted only while fewer than `max_requests`
//! grants remain in that window, and consecutive grants are spaced by
//! `window / max_requests`.
//!
//! Waiters queue on a tokio [`Mutex`], which hands out the lock in the order
//! `lock()` was called. Only the head of that queue inspects the window, so
//! admission is strictly FIFO and the window state has a single owner at any
//! instant.

use metrics::{counter, histogram};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

use crate::exporter::config::RATE_LIMIT_WINDOW;

/// Shared sliding-window rate limiter. Cloning shares the same window.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<WindowState>>,
    issued: Arc<AtomicU64>,
    max_requests: u32,
    window: Duration,
    spacing: Duration,
}

#[derive(Default)]
struct WindowState {
    grants: VecDeque<Instant>,
    next_allowed: Option<Instant>,
}

impl WindowState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.grants.front() {
            if now.duration_since(oldest) >= window {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Permission to issue exactly one outbound call.
#[derive(Debug)]
pub struct RateLimitSlot {
    sequence: u64,
    granted_at: Instant,
}

impl RateLimitSlot {
    /// 1-based grant number across the limiter's lifetime
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Instant the slot was granted
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

impl RateLimiter {
    /// Limiter admitting `max_requests` calls per second
    pub fn per_second(max_requests: u32) -> Result<Self, RateLimitError> {
        Self::new(max_requests, RATE_LIMIT_WINDOW)
    }

    /// Limiter admitting `max_requests` calls per `window`
    ///
    /// # Errors
    /// Returns [`RateLimitError`] if either limit is zero.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::InvalidRate(max_requests));
        }
        if window.is_zero() {
            return Err(RateLimitError::InvalidWindow);
        }

        Ok(Self {
            state: Arc::new(Mutex::new(WindowState::default())),
            issued: Arc::new(AtomicU64::new(0)),
            max_requests,
            window,
            spacing: window / max_requests,
        })
    }

    /// Maximum grants per window
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Length of the sliding window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Total slots granted so far. Never waits on queued callers.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Wait for an admission slot.
    ///
    /// Callers are served in the order they called `acquire`; a caller only
    /// proceeds after every earlier caller has been granted.
    pub async fn acquire(&self) -> RateLimitSlot {
        let queued_at = Instant::now();
        let mut state = self.state.lock().await;

        loop {
            let now = Instant::now();
            state.prune(now, self.window);

            let spaced = state.next_allowed.map_or(true, |t| now >= t);
            let has_room = state.grants.len() < self.max_requests as usize;

            if spaced && has_room {
                state.grants.push_back(now);
                state.next_allowed = Some(now + self.spacing);
                // Incremented under the window lock, so sequence follows grant order
                let sequence = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

                let waited = now.duration_since(queued_at);
                histogram!("rate_limit_queue_wait_seconds").record(waited.as_secs_f64());
                counter!("rate_limit_permits_acquired_total").increment(1);
                trace!(
                    sequence,
                    in_window = state.grants.len(),
                    wait_ms = waited.as_millis(),
                    "Rate limit slot granted"
                );

                return RateLimitSlot {
                    sequence,
                    granted_at: now,
                };
            }

            let mut wake = now;
            if let Some(next) = state.next_allowed {
                wake = wake.max(next);
            }
            if !has_room {
                if let Some(&oldest) = state.grants.front() {
                    wake = wake.max(oldest + self.window);
                }
            }
            sleep_until(wake).await;
        }
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Rate must admit at least one request
    #[error("invalid rate limit: {0} requests per window")]
    InvalidRate(u32),

    /// Window must be non-zero
    #[error("rate limit window must be non-zero")]
    InvalidWindow,
}
