//! Observability metrics for the exporter
//!
//! Two layers:
//!
//! - [`RequestCounters`]: in-process atomic counters shared (via `Arc`) by
//!   every component of one export run, so a run can report its own request
//!   and error totals without any global state
//! - `metrics` crate counters/histograms mirrored from the same call sites,
//!   scraped through an optional Prometheus endpoint

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::fetcher::FetcherError;

/// Address the Prometheus exporter was installed on, once installed
static METRICS_ADDR: OnceCell<SocketAddr> = OnceCell::new();

/// Initialize the Prometheus exporter
///
/// Idempotent: a second call is a no-op returning `Ok(())`.
///
/// # Arguments
/// * `addr` - Socket address for the scrape endpoint (e.g., "0.0.0.0:9090")
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_ADDR.get().is_some() {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of requests issued to the listing API"
    );
    describe_counter!(
        "http_errors_total",
        Unit::Count,
        "Total number of failed request attempts"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "rate_limit_permits_acquired_total",
        Unit::Count,
        "Total number of rate limit slots granted"
    );
    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limit slot"
    );
    describe_counter!(
        "export_items_completed_total",
        Unit::Count,
        "Work items that produced a result batch"
    );
    describe_counter!(
        "export_items_failed_total",
        Unit::Count,
        "Work items dropped after a processing failure"
    );

    let _ = METRICS_ADDR.set(addr);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether the Prometheus exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_ADDR.get().is_some()
}

/// Request and error totals for one export run
#[derive(Debug, Default)]
pub struct RequestCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`RequestCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RequestSnapshot {
    /// Attempts issued
    pub requests: u64,
    /// Attempts that failed
    pub errors: u64,
    /// Attempts that were retries
    pub retries: u64,
}

impl RequestCounters {
    /// Fresh zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outbound attempt
    pub fn record_request(&self, endpoint: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!("http_requests_total", "endpoint" => endpoint.to_string()).increment(1);
    }

    /// Count one failed attempt
    pub fn record_error(&self, endpoint: &str, error: &FetcherError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(
            "http_errors_total",
            "endpoint" => endpoint.to_string(),
            "class" => error.class().description(),
        )
        .increment(1);
    }

    /// Count one retry and its backoff
    pub fn record_retry(&self, backoff: Duration, attempt: u32) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        record_retry_backoff(backoff, attempt);
    }

    /// Current totals
    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record the outcome of one work item
pub fn record_item_outcome(success: bool) {
    if success {
        counter!("export_items_completed_total").increment(1);
    } else {
        counter!("export_items_failed_total").increment(1);
    }
}

/// Export run metrics
pub struct ExportMetrics {
    export_name: String,
    start_time: Instant,
}

impl ExportMetrics {
    /// Start tracking an export run
    pub fn start(export_name: impl Into<String>) -> Self {
        let export_name = export_name.into();

        info!(export = %export_name, "Export started");

        Self {
            export_name,
            start_time: Instant::now(),
        }
    }

    /// Record successful completion
    pub fn record_success(&self, rows_written: u64, items_failed: u64) {
        let duration = self.start_time.elapsed();

        counter!("exports_completed_total", "export" => self.export_name.clone()).increment(1);

        info!(
            export = %self.export_name,
            rows_written = rows_written,
            items_failed = items_failed,
            duration_secs = duration.as_secs(),
            "Export completed successfully"
        );
    }

    /// Record a failed run
    pub fn record_failure(&self, error: &str) {
        let duration = self.start_time.elapsed();

        counter!("exports_failed_total", "export" => self.export_name.clone()).increment(1);

        error!(
            export = %self.export_name,
            error = %error,
            duration_secs = duration.as_secs(),
            "Export failed"
        );
    }
}
