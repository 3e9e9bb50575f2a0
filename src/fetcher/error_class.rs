//! Error classification shared by the retry executor and the crawler.
//!
//! Maps every [`FetcherError`](super::FetcherError) onto a coarse class that
//! decides retry eligibility and drives user-facing log messages.

use reqwest::{Error as ReqwestError, StatusCode};
use std::error::Error as StdError;
use std::io::ErrorKind;

/// Classification of remote-call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network timeout or connection stalled long enough to trigger a timeout
    NetworkTimeout,
    /// Connection refused, reset, DNS failure, or other offline scenarios
    NetworkOffline,
    /// Any other transport failure (redirect loop, body or builder error)
    NetworkGeneric,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400 invalid request
    InvalidRequest,
    /// Authentication failures (401/403) or an expired credential
    AuthFailed(u16),
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Body could not be decoded into the expected shape
    MalformedResponse,
    /// Page number or date range past the end of the remote collection
    CrawlBoundary,
}

impl ErrorClass {
    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::NetworkGeneric => "network error",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                _ => "client error",
            },
            Self::MalformedResponse => "malformed response",
            Self::CrawlBoundary => "end of remote collection",
        }
    }

    /// Suggested remediation presented after a terminal failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::NetworkGeneric => "Check network connectivity and try again",
            Self::RateLimit => "Lower --rate or --concurrency and try again",
            Self::ServerError(_) => "The marketplace API may be degraded, try again later",
            Self::InvalidRequest => "Check page size and date window arguments",
            Self::AuthFailed(_) => "Refresh EBAY_ACCESS_TOKEN and verify its OAuth scopes",
            Self::ClientError(_) => "Review request parameters against the listing API docs",
            Self::MalformedResponse => "Check --base-url points at the listing API",
            Self::CrawlBoundary => "No action needed, the crawl reached the end of the data",
        }
    }

    /// Whether a call failing this way is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::NetworkOffline
                | Self::RateLimit
                | Self::ServerError(_)
        )
    }
}

/// Classify an HTTP status code.
pub fn classify_status(status: StatusCode) -> ErrorClass {
    match status.as_u16() {
        400 => ErrorClass::InvalidRequest,
        401 | 403 => ErrorClass::AuthFailed(status.as_u16()),
        429 => ErrorClass::RateLimit,
        code if status.is_server_error() => ErrorClass::ServerError(code),
        code => ErrorClass::ClientError(code),
    }
}

/// Classify a transport-level reqwest error.
pub fn classify_transport(err: &ReqwestError) -> ErrorClass {
    if err.is_timeout() {
        ErrorClass::NetworkTimeout
    } else if err.is_connect() || is_connection_drop(err) {
        ErrorClass::NetworkOffline
    } else if err.is_decode() {
        ErrorClass::MalformedResponse
    } else {
        ErrorClass::NetworkGeneric
    }
}

/// Connection reset or aborted anywhere in the error's source chain
fn is_connection_drop(err: &ReqwestError) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if is_drop_kind(io.kind()) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn is_drop_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
