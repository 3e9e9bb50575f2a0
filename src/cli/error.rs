//! CLI error types and conversions

use crate::exporter::{ExportError, RateLimitError};
use crate::fetcher::FetcherError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Export engine error
    #[error("export error: {0}")]
    ExportError(#[from] ExportError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Rate limit configuration error
    #[error("rate limit error: {0}")]
    RateLimitError(#[from] RateLimitError),

    /// The listing collection could not be crawled
    #[error("listing crawl failed: {0}")]
    CrawlFailed(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
