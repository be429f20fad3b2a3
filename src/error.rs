//! Error types for the Defiant client runtime
//!
//! This module provides the error type hierarchy using `thiserror`. The
//! taxonomy determines retry behavior: only [`Error::TransientNetwork`] is
//! retried internally, everything else surfaces to the caller immediately.

use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Defiant client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input; no request was issued. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad or expired API key. Never retried.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The requested entity does not exist on the remote side.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-retryable remote rejection outside the categories above.
    #[error("API error ({code}): {message}")]
    Api {
        /// Numeric error code reported by the remote side.
        code: u16,
        /// Remote error message.
        message: String,
    },

    /// Transient failure (network error, 5xx, 429). Retried per the backoff
    /// policy; surfaces only after the retry budget is exhausted.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Caller-imposed deadline expired. Does not imply the request was not
    /// committed server-side; the idempotency key covers any later retry.
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Webhook rejected before its payload was interpreted.
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// State persistence failure. Non-fatal; the session degrades to
    /// in-memory-only operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or rejected crypto input (keys, addresses, blobs).
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Webhook rejection reasons.
///
/// All three mean the payload was never decoded as structured data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// The recomputed digest does not match the signature header.
    #[error("Webhook signature mismatch")]
    InvalidSignature,

    /// The claimed timestamp is outside the replay tolerance window.
    #[error("Webhook timestamp outside tolerance window")]
    Expired,

    /// The signature header could not be parsed into its fields.
    #[error("Malformed webhook signature header: {0}")]
    Malformed(String),
}

impl Error {
    /// Whether this error is retried by the backoff policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::TransientNetwork(err.to_string())
        } else {
            Self::Api {
                code: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}
