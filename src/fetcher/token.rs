//! Bearer credential consumed from the environment

use chrono::{DateTime, Utc};
use std::fmt;

use super::{FetcherError, FetcherResult};

/// Environment variable carrying the OAuth access token
pub const TOKEN_ENV: &str = "EBAY_ACCESS_TOKEN";

/// Optional RFC 3339 expiry for [`TOKEN_ENV`]
pub const TOKEN_EXPIRY_ENV: &str = "EBAY_ACCESS_TOKEN_EXPIRES_AT";

/// Opaque bearer token with an optional expiry
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Token without a known expiry
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    /// Attach an expiry instant
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Load from [`TOKEN_ENV`] and [`TOKEN_EXPIRY_ENV`]
    ///
    /// # Errors
    /// [`FetcherError::MissingCredential`] when the token is unset, blank, or
    /// the expiry does not parse.
    pub fn from_env() -> FetcherResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> FetcherResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup(TOKEN_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FetcherError::MissingCredential(format!("{TOKEN_ENV} is not set")))?;

        let mut token = Self::new(secret);
        if let Some(raw) = lookup(TOKEN_EXPIRY_ENV).filter(|s| !s.trim().is_empty()) {
            let expires_at = DateTime::parse_from_rfc3339(raw.trim())
                .map_err(|e| {
                    FetcherError::MissingCredential(format!(
                        "{TOKEN_EXPIRY_ENV} is not RFC 3339: {e}"
                    ))
                })?
                .with_timezone(&Utc);
            token = token.with_expiry(expires_at);
        }
        Ok(token)
    }

    /// Bearer secret
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Expiry, if known
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the token has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Fail with [`FetcherError::TokenExpired`] once past the expiry
    pub fn ensure_valid(&self) -> FetcherResult<()> {
        match self.expires_at {
            Some(at) if self.is_expired_at(Utc::now()) => Err(FetcherError::TokenExpired(at)),
            _ => Ok(()),
        }
    }
}

// Never print the secret
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
