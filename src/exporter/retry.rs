//! Retrying request executor
//!
//! Wraps one remote call with rate-limit admission and a bounded exponential
//! backoff policy.
//!
//! Retries on:
//! - Network errors (timeout, connection refused/reset)
//! - 429 rate limit errors
//! - 5xx server errors
//!
//! Does not retry on:
//! - 4xx client errors (except 429)
//! - Malformed response bodies
//! - Credential errors

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::exporter::config::{backoff_from, INITIAL_BACKOFF_MS, MAX_ATTEMPTS};
use crate::exporter::rate_limit::RateLimiter;
use crate::fetcher::{FetcherError, FetcherResult};
use crate::metrics::RequestCounters;

/// Attempt cap and backoff base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Policy with `max_attempts` total attempts (at least 1)
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Total attempts, initial one included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay applied before attempt number `attempt` (1-based)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            backoff_from(self.base_delay, attempt - 1)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, Duration::from_millis(INITIAL_BACKOFF_MS))
    }
}

/// State of one attempt inside a single `execute` call
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Attempts allowed in total
    pub max_attempts: u32,
    /// Error that ended the previous attempt
    pub previous_error: Option<FetcherError>,
    /// Delay waited before this attempt
    pub backoff: Duration,
    /// Endpoint or operation label
    pub label: String,
}

impl RequestAttempt {
    fn first(label: &str, max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts,
            previous_error: None,
            backoff: Duration::ZERO,
            label: label.to_string(),
        }
    }

    fn next(self, error: FetcherError, backoff: Duration) -> Self {
        Self {
            attempt: self.attempt + 1,
            previous_error: Some(error),
            backoff,
            ..self
        }
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let cause = self
            .previous_error
            .as_ref()
            .map(|e| e.class().description())
            .unwrap_or("unknown error");
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt,
            self.max_attempts,
            cause,
            self.backoff.as_secs_f64(),
            self.label
        )
    }

    /// Format retry success message when a later attempt works.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded ({})",
            self.attempt, self.max_attempts, self.label
        )
    }

    /// Format final failure summary with an actionable suggestion.
    pub fn format_failure(&self, last_error: &FetcherError) -> String {
        [
            format!("[FAILED] Request failed after {} attempts", self.attempt),
            format!("  Last error: {last_error}"),
            format!("  Endpoint: {}", self.label),
            format!("  Suggestion: {}", last_error.class().suggestion()),
        ]
        .join("\n")
    }
}

/// Runs remote calls through the rate limiter with bounded retries
#[derive(Clone)]
pub struct RetryingExecutor {
    limiter: RateLimiter,
    policy: RetryPolicy,
    counters: Arc<RequestCounters>,
}

impl RetryingExecutor {
    /// Executor with the default policy (3 attempts, 2s/4s backoff)
    pub fn new(limiter: RateLimiter, counters: Arc<RequestCounters>) -> Self {
        Self {
            limiter,
            policy: RetryPolicy::default(),
            counters,
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Retry policy in use
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Shared counters
    pub fn counters(&self) -> &Arc<RequestCounters> {
        &self.counters
    }

    /// Shared rate limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Execute `operation` until it succeeds, fails fatally, or runs out of
    /// attempts.
    ///
    /// `operation` must perform exactly one remote call per invocation; a
    /// rate-limit slot is acquired before every invocation.
    ///
    /// # Errors
    /// The first fatal error, or the last retryable error once the attempt
    /// cap is reached.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> FetcherResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetcherResult<T>>,
    {
        let mut attempt = RequestAttempt::first(label, self.policy.max_attempts());

        loop {
            if attempt.attempt > 1 {
                self.counters.record_retry(attempt.backoff, attempt.attempt);
                tokio::time::sleep(attempt.backoff).await;
            }

            let slot = self.limiter.acquire().await;
            self.counters.record_request(label);
            debug!(
                endpoint = label,
                attempt = attempt.attempt,
                slot = slot.sequence(),
                "Issuing request"
            );

            match operation().await {
                Ok(value) => {
                    if attempt.attempt > 1 {
                        info!("{}", attempt.format_success());
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.counters.record_error(label, &err);

                    if !err.is_retryable() {
                        debug!(
                            endpoint = label,
                            attempt = attempt.attempt,
                            error = %err,
                            "Non-retryable error"
                        );
                        return Err(err);
                    }

                    if attempt.attempt >= attempt.max_attempts {
                        error!("{}", attempt.format_failure(&err));
                        return Err(err);
                    }

                    let backoff = self.policy.delay_before(attempt.attempt + 1);
                    attempt = attempt.next(err, backoff);
                    warn!("{}", attempt.format_retry());
                }
            }
        }
    }
}
