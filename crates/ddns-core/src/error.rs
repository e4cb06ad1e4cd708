//! Error types for the DDNS system
//!
//! This module defines all error types used throughout the workspace.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for DDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS system
#[derive(Error, Debug)]
pub enum Error {
    /// Address detection errors (no candidate, policy violation, bad payload)
    #[error("Address detection error: {0}")]
    Detection(String),

    /// Address failed syntax or family classification
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backend identifier was required but never resolved
    #[error("Missing identifier: {0}")]
    MissingIdentifier(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from provider APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Scheduler errors (bad cron expression, shutdown failure)
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// The surrounding cancellation token fired
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A bounded call exceeded its time budget
    #[error("Operation timed out after {limit:?}: {operation}")]
    Timeout {
        /// What was being attempted
        operation: String,
        /// The bound that was exceeded
        limit: Duration,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an address detection error
    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing identifier error
    pub fn missing_identifier(msg: impl Into<String>) -> Self {
        Self::MissingIdentifier(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a scheduler error
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Whether this error came from cancellation or an exceeded time bound
    ///
    /// Callers use this to tell an interrupted pass apart from a backend
    /// or detection failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Timeout { .. })
    }

    /// Map a non-success HTTP status to an error for `provider`
    ///
    /// 401/403 become authentication errors, 404 not found, 429 rate limited,
    /// everything else a provider error carrying the body.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::auth(format!(
                "{}: invalid credentials or insufficient permissions (status {})",
                provider, status
            )),
            404 => Self::not_found(format!("{}: {}", provider, body)),
            429 => Self::rate_limited(format!("{}: status {}", provider, status)),
            500..=599 => Self::provider(
                provider,
                format!("server error (transient): {} - {}", status, body),
            ),
            _ => Self::provider(provider, format!("request failed: {} - {}", status, body)),
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_covers_timeout_and_cancel() {
        assert!(Error::cancelled("shutdown").is_cancellation());
        assert!(Error::timeout("get", Duration::from_secs(3)).is_cancellation());
        assert!(!Error::detection("no public address").is_cancellation());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            Error::from_status("cloudflare", 403, ""),
            Error::Authentication(_)
        ));
        assert!(matches!(
            Error::from_status("cloudflare", 404, "gone"),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from_status("cloudflare", 429, ""),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            Error::from_status("cloudflare", 502, "bad gateway"),
            Error::Provider { .. }
        ));
    }
}
