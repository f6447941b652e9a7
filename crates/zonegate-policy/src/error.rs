//! Error types for policy engines.

use thiserror::Error;

/// A result type using `PolicyError`.
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors produced by policy engines and the registry.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The operator-supplied configuration was rejected. The message is
    /// user-facing and surfaced verbatim.
    #[error("{message}")]
    Validation {
        /// Human-readable rejection reason.
        message: String,
    },

    /// No engine is registered for the requested category.
    #[error("unknown policy category: {0}")]
    UnknownCategory(String),

    /// An engine failed internally (not the operator's fault).
    #[error("policy engine error: {0}")]
    Internal(String),
}

impl PolicyError {
    /// Build a validation error with a user-facing message.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// True if the error should be reported as "your input was rejected".
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::UnknownCategory(_))
    }
}
