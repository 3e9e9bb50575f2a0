//! HTTP client for the listing API
//!
//! Every request carries the bearer token and runs through the shared
//! [`RetryingExecutor`], so it is rate limited and retried on transient
//! failures. Non-success responses are classified from the status code and,
//! for 4xx, from the machine-readable error list in the body.

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::error_class::classify_status;
use super::token::AccessToken;
use super::{ApiErrorDetail, ErrorClass, FetcherError, FetcherResult};
use crate::exporter::retry::RetryingExecutor;

/// Production API host
pub const DEFAULT_BASE_URL: &str = "https://api.ebay.com";

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Longest body excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Build the HTTP client with explicit timeouts
pub fn build_http_client() -> FetcherResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| FetcherError::NetworkError(format!("Failed to build HTTP client: {e}")))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

/// Authenticated, rate-limited JSON client
pub struct EbayHttpClient {
    client: Arc<Client>,
    base_url: String,
    token: AccessToken,
    executor: RetryingExecutor,
}

impl EbayHttpClient {
    /// Create a client
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `base_url` - API host, e.g. "<https://api.ebay.com>"
    /// * `token` - Bearer credential
    /// * `executor` - Shared retrying executor (owns the rate limiter)
    pub fn new(
        client: Arc<Client>,
        base_url: impl Into<String>,
        token: AccessToken,
        executor: RetryingExecutor,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            executor,
        }
    }

    /// API host
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared executor
    pub fn executor(&self) -> &RetryingExecutor {
        &self.executor
    }

    /// GET the endpoint at `segments` below the base URL and decode the JSON
    /// body. Each segment is percent-encoded.
    ///
    /// `label` names the endpoint in logs and metrics without per-item ids.
    ///
    /// # Errors
    /// [`FetcherError::TokenExpired`] before any request once the token has
    /// expired; otherwise the classified error of the final attempt.
    pub async fn get<T>(&self, label: &str, segments: &[&str], params: &[(&str, String)]) -> FetcherResult<T>
    where
        T: DeserializeOwned,
    {
        self.token.ensure_valid()?;
        let url = self.endpoint_url(segments)?;

        self.executor
            .execute(label, || self.send_once::<T>(&url, params))
            .await
    }

    /// Base URL with `segments` appended as encoded path segments
    pub fn endpoint_url(&self, segments: &[&str]) -> FetcherResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            FetcherError::NetworkError(format!("Invalid base URL {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                FetcherError::NetworkError(format!("Base URL cannot carry a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_once<T>(&self, url: &Url, params: &[(&str, String)]) -> FetcherResult<T>
    where
        T: DeserializeOwned,
    {
        debug!("Making GET request to: {} with {} params", url, params.len());

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(self.token.secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_response(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            FetcherError::MalformedResponse(format!("Failed to deserialize response: {e}"))
        })
    }
}

/// Map a non-success response onto a [`FetcherError`]
///
/// 4xx bodies are inspected for errors that mark the end of a crawl: an
/// offset or page past the last result, or dates outside the retained
/// history.
pub fn classify_response(status: StatusCode, body: &str) -> FetcherError {
    let code = status.as_u16();
    let message = summarize_body(body);

    match classify_status(status) {
        ErrorClass::RateLimit => return FetcherError::RateLimitExceeded,
        ErrorClass::ServerError(status) => return FetcherError::ServerError { status, message },
        _ => {}
    }

    let errors = serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.errors)
        .unwrap_or_default();

    if let Some(detail) = errors.iter().find(|d| is_invalid_page(d)) {
        return FetcherError::InvalidPage(detail.to_string());
    }
    if let Some(detail) = errors.iter().find(|d| is_date_range_boundary(d)) {
        return FetcherError::DateRangeOutOfBounds(detail.to_string());
    }

    FetcherError::ClientError {
        status: code,
        message,
        errors,
    }
}

fn detail_text(detail: &ApiErrorDetail) -> String {
    let mut text = detail.message.clone().unwrap_or_default();
    if let Some(long) = &detail.long_message {
        text.push(' ');
        text.push_str(long);
    }
    text.to_ascii_lowercase()
}

fn is_invalid_page(detail: &ApiErrorDetail) -> bool {
    let text = detail_text(detail);
    (text.contains("offset") || text.contains("page"))
        && (text.contains("invalid") || text.contains("exceed") || text.contains("out of range"))
}

fn is_date_range_boundary(detail: &ApiErrorDetail) -> bool {
    let text = detail_text(detail);
    (text.contains("date") || text.contains("createdfrom") || text.contains("time range"))
        && (text.contains("range")
            || text.contains("outside")
            || text.contains("older than")
            || text.contains("not supported"))
}

fn summarize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
