//! Error types for the Kong admin adapter.

use thiserror::Error;

/// Errors returned by proxy adapter operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The admin API rejected the request.
    #[error("proxy admin API rejected request: {status}: {body}")]
    AdminRejected {
        /// HTTP status returned by the admin API.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The request could not be delivered.
    #[error("proxy admin API unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The admin API returned a payload we could not interpret.
    #[error("unexpected proxy admin response: {0}")]
    Protocol(String),
}

/// Convenience alias for proxy results.
pub type Result<T> = std::result::Result<T, ProxyError>;
