//! Remote listing API access: error taxonomy, pagination, and the HTTP client

use crate::{Listing, Sale};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub mod ebay_http;
pub mod ebay_listings;
pub mod ebay_parser;
pub mod error_class;
pub mod pagination;
pub mod token;

pub use error_class::ErrorClass;
pub use pagination::{
    CrawlOutcome, CrawlRequest, CrawlStrategy, PageCursor, PageRequest, PaginationCrawler,
    StopReason, TimeWindow,
};

/// One entry of the machine-readable error list returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorDetail {
    /// Numeric error identifier
    #[serde(default)]
    pub error_id: Option<u32>,
    /// Short message
    #[serde(default)]
    pub message: Option<String>,
    /// Longer explanation, when provided
    #[serde(default)]
    pub long_message: Option<String>,
}

impl std::fmt::Display for ApiErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self
            .long_message
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("no message");
        match self.error_id {
            Some(id) => write!(f, "[{id}] {message}"),
            None => write!(f, "{message}"),
        }
    }
}

/// Fetcher errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetcherError {
    /// Request timed out
    #[error("network timeout: {0}")]
    Timeout(String),

    /// Connection refused or reset
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Other transport error
    #[error("network error: {0}")]
    NetworkError(String),

    /// HTTP 429
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// HTTP 5xx
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Response body or summary
        message: String,
    },

    /// HTTP 4xx other than 429
    #[error("client error {status}: {message}")]
    ClientError {
        /// HTTP status code
        status: u16,
        /// Response body or summary
        message: String,
        /// Parsed error list, if the body carried one
        errors: Vec<ApiErrorDetail>,
    },

    /// Requested page lies past the end of the collection
    #[error("invalid page number: {0}")]
    InvalidPage(String),

    /// Requested date range lies outside the supported history
    #[error("date range outside supported history: {0}")]
    DateRangeOutOfBounds(String),

    /// Response body did not match the expected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Credential was not provided
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Credential expired before the call
    #[error("access token expired at {0}")]
    TokenExpired(DateTime<Utc>),
}

impl FetcherError {
    /// Coarse classification used for retry and log decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::NetworkTimeout,
            Self::ConnectionFailed(_) => ErrorClass::NetworkOffline,
            Self::NetworkError(_) => ErrorClass::NetworkGeneric,
            Self::RateLimitExceeded => ErrorClass::RateLimit,
            Self::ServerError { status, .. } => ErrorClass::ServerError(*status),
            Self::ClientError { status, .. } => match *status {
                400 => ErrorClass::InvalidRequest,
                401 | 403 => ErrorClass::AuthFailed(*status),
                other => ErrorClass::ClientError(other),
            },
            Self::InvalidPage(_) | Self::DateRangeOutOfBounds(_) => ErrorClass::CrawlBoundary,
            Self::MalformedResponse(_) => ErrorClass::MalformedResponse,
            Self::MissingCredential(_) => ErrorClass::AuthFailed(401),
            Self::TokenExpired(_) => ErrorClass::AuthFailed(401),
        }
    }

    /// Transient failures: timeouts, dropped or refused connections, 429, and 5xx
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// The crawl asked for a page past the last one
    pub fn is_invalid_page(&self) -> bool {
        matches!(self, Self::InvalidPage(_))
    }

    /// The crawl asked for dates the remote no longer serves
    pub fn is_date_range_boundary(&self) -> bool {
        matches!(self, Self::DateRangeOutOfBounds(_))
    }
}

impl From<reqwest::Error> for FetcherError {
    fn from(err: reqwest::Error) -> Self {
        match error_class::classify_transport(&err) {
            ErrorClass::NetworkTimeout => Self::Timeout(err.to_string()),
            ErrorClass::NetworkOffline => Self::ConnectionFailed(err.to_string()),
            ErrorClass::MalformedResponse => Self::MalformedResponse(err.to_string()),
            _ => Self::NetworkError(err.to_string()),
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One bounded chunk of a larger remote result set
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Whether the server reports more results after this page
    pub has_more: bool,
    /// Total result count, when the server reports it
    pub total: Option<u64>,
    /// Raw records the server sent, including any the parser skipped
    pub received: usize,
}

impl<T> Page<T> {
    /// Page with an explicit has-more flag
    pub fn new(items: Vec<T>, has_more: bool) -> Self {
        let received = items.len();
        Self {
            items,
            has_more,
            total: None,
            received,
        }
    }

    /// Final page of a collection
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, false)
    }

    /// Attach the server-reported total
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Record how many raw records the server sent for this page.
    ///
    /// Never lower than the number of parsed items.
    pub fn with_received(mut self, received: usize) -> Self {
        self.received = received.max(self.items.len());
        self
    }
}

/// Listing API operations used by the exporter
#[async_trait]
pub trait ListingApi: Send + Sync {
    /// Fetch one page of the seller's active listings
    async fn fetch_listings_page(&self, page: PageRequest) -> FetcherResult<Page<Listing>>;

    /// Fetch the full record for one listing
    async fn fetch_listing(&self, listing_id: &str) -> FetcherResult<Listing>;

    /// Fetch one page of a listing's sales inside a date window
    async fn fetch_sales(
        &self,
        listing_id: &str,
        window: TimeWindow,
        page: PageRequest,
    ) -> FetcherResult<Page<Sale>>;

    /// Base URL requests are issued against
    fn base_url(&self) -> &str;
}
