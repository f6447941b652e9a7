//! Error types for the control plane.
//!
//! This module defines all errors that can occur during policy apply,
//! aggregation, publishing, and zone lifecycle operations.

use thiserror::Error;
use zonegate_core::{PackageId, ZoneId};
use zonegate_policy::PolicyError;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Operator input was rejected. The message is engine-supplied and
    /// surfaced verbatim.
    #[error("{message}")]
    Validation {
        /// Human-readable rejection reason.
        message: String,
    },

    /// Two policy fragments claim the same configuration key.
    #[error("conflicting policy fragments for key: {key}")]
    Conflict {
        /// The contested annotation or configmap key.
        key: String,
    },

    /// The requested zone was not found.
    #[error("zone not found: {0}")]
    ZoneNotFound(ZoneId),

    /// The requested package was not found.
    #[error("package not found: {0}")]
    PackageNotFound(PackageId),

    /// No engine is registered for the requested category.
    #[error("unknown policy category: {0}")]
    CategoryNotFound(String),

    /// A zone with this id already exists.
    #[error("zone already exists: {0}")]
    ZoneExists(ZoneId),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] zonegate_store::StoreError),

    /// Proxy admin API error.
    #[error("proxy error: {0}")]
    Proxy(#[from] zonegate_proxy::ProxyError),

    /// Mesh adapter error.
    #[error("mesh error: {0}")]
    Mesh(#[from] zonegate_mesh::MeshError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PolicyError> for ControlError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Validation { message } => Self::Validation { message },
            PolicyError::UnknownCategory(category) => Self::CategoryNotFound(category),
            PolicyError::Internal(message) => Self::Internal(message),
        }
    }
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Conflict { .. } | Self::ZoneExists(_) => 409,
            Self::ZoneNotFound(_) | Self::PackageNotFound(_) | Self::CategoryNotFound(_) => 404,
            Self::Store(_) | Self::Proxy(_) | Self::Mesh(_) | Self::Internal(_) => 500,
        }
    }

    /// True if the error is the caller's fault rather than the platform's.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        self.http_status_code() < 500
    }

    /// True if infrastructure may have been partially mutated, which means
    /// the caller must roll back and reconcile.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Proxy(_) | Self::Mesh(_) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let zone_id = ZoneId::new("z1").unwrap();
        let package_id = PackageId::new("p1").unwrap();

        assert_eq!(
            ControlError::Validation {
                message: "bad".to_string()
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            ControlError::Conflict {
                key: "proxy-body-size".to_string()
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            ControlError::ZoneNotFound(zone_id.clone()).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::PackageNotFound(package_id).http_status_code(),
            404
        );
        assert_eq!(ControlError::ZoneExists(zone_id).http_status_code(), 409);
        assert_eq!(
            ControlError::Internal("boom".to_string()).http_status_code(),
            500
        );
    }

    #[test]
    fn validation_message_is_verbatim() {
        let err: ControlError = PolicyError::validation("cors requires at least one allowed origin")
            .into();
        assert_eq!(err.to_string(), "cors requires at least one allowed origin");
        assert!(err.is_user_error());
        assert!(!err.is_infrastructure());
    }
}
