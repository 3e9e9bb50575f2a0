//! Integration tests for logging and tracing

use listing_exporter::exporter::{RateLimiter, RetryingExecutor};
use listing_exporter::fetcher::FetcherError;
use listing_exporter::metrics::RequestCounters;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_test_tracing(directive: &str) {
    // Only the first subscriber in the test binary wins; later calls are no-ops
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_test_writer()
        .try_init();
}

#[test]
fn test_env_filter_directives_parse() {
    for directive in [
        "info",
        "listing_exporter=debug",
        "warn,listing_exporter=trace",
        "listing_exporter::fetcher=debug,listing_exporter=info",
        "listing_exporter::exporter::rate_limit=trace",
    ] {
        assert!(EnvFilter::try_new(directive).is_ok(), "{directive}");
    }
}

#[test]
fn test_json_subscriber_builds() {
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new("listing_exporter=info"))
        .with_test_writer()
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        info!(listing_id = "110001", rows = 3, "Listing exported");
    });
}

#[test]
fn test_structured_fields_and_spans() {
    init_test_tracing("listing_exporter=debug");

    let span = tracing::info_span!("export_item", item_id = "110001", item_index = 0);
    let _enter = span.enter();

    info!(listing_id = "110001", sales = 2, "Sales history crawled");
    warn!(window = 2, "Window failed, skipping to next window");
    error!(item_id = "110001", error = "not found", "Item dropped");
}

#[tokio::test]
async fn test_retry_logging_under_subscriber() {
    init_test_tracing("listing_exporter=debug");

    let executor = RetryingExecutor::new(
        RateLimiter::per_second(50).unwrap(),
        Arc::new(RequestCounters::new()),
    );

    // Exercises the debug/error log paths of a fatal failure
    let result: Result<(), _> = executor
        .execute("listing_detail", || async {
            Err(FetcherError::MalformedResponse("not json".to_string()))
        })
        .await;

    assert!(matches!(result, Err(FetcherError::MalformedResponse(_))));
}
