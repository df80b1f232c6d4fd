//! Provider error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when calling the generation backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Backend returned an error response
    #[error("backend error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Backend rejected the request with 429
    #[error("backend rate limited the request: {message}")]
    RateLimited {
        message: String,
        /// Delay requested by the backend via the Retry-After header.
        retry_after: Option<Duration>,
    },

    /// Backend endpoint or model was not found
    #[error("{message}")]
    NotFound { message: String },
}

impl ProviderError {
    /// Whether a retry could plausibly succeed: rate limits, server
    /// errors, and transport failures. Client errors are not retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Request(e) => !e.is_builder(),
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::RateLimited { .. } => true,
            ProviderError::NotFound { .. } => false,
        }
    }
}
