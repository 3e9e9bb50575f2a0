//! Export engine configuration constants

use std::time::Duration;

/// Maximum number of attempts for a single remote call (initial attempt included).
/// 3 attempts ride out a short 429 burst or a flapping 5xx without letting one
/// stuck listing hold a worker slot for more than ~6 seconds of backoff.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay in milliseconds.
/// The delay before attempt `k` is `INITIAL_BACKOFF_MS * 2^(k-1)`: 2s, then 4s.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000; // 30 seconds

/// Default number of outbound requests admitted per second.
/// The seller APIs throttle per application; 5/s stays well inside the
/// daily call budget for a few thousand listings.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

/// Sliding window used by the rate limiter.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Default maximum number of listings enriched concurrently.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Upper bound accepted for `--concurrency`.
pub const MAX_CONCURRENCY: usize = 100;

/// Pause between two job launches so a freshly freed pool does not dump a
/// burst of requests onto the rate limiter queue at once.
pub const DEFAULT_LAUNCH_DELAY: Duration = Duration::from_millis(20);

/// Expected item count above which results are streamed to the sink instead
/// of being buffered in memory.
pub const STREAMING_THRESHOLD: usize = 200;

/// Default listings page size (the listing endpoint caps `limit` at 200).
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Hard ceiling on page-number crawls.
pub const MAX_PAGES: u32 = 1_000;

/// Default width of one time window in days.
/// The transaction endpoint rejects date ranges wider than 120 days.
pub const DEFAULT_WINDOW_DAYS: i64 = 120;

/// Default number of windows tried before a time-window crawl stops.
pub const DEFAULT_MAX_WINDOWS: u32 = 8;

/// Hard ceiling on pages requested inside a single time window.
pub const MAX_PAGES_PER_WINDOW: u32 = 50;

/// Consecutive empty windows after which history is assumed exhausted.
pub const MAX_EMPTY_WINDOWS: u32 = 3;

/// Consecutive page/window failures after which a crawl gives up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Capacity of the channel between the worker pool and the sink.
pub const BATCH_CHANNEL_CAPACITY: usize = 64;

/// Backoff applied before the next attempt, capped at [`MAX_BACKOFF_MS`].
///
/// `retry_count` is the number of attempts already made (1 before the second
/// attempt, 2 before the third).
pub fn backoff_from(base: Duration, retry_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry_count.min(16));
    base.saturating_mul(factor)
        .min(Duration::from_millis(MAX_BACKOFF_MS))
}
