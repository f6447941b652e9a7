//! Error types for the mesh adapter.

use thiserror::Error;

/// Errors returned by mesh router operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Kubernetes API error.
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The adapter was asked to deploy to a cluster it is not configured for.
    #[error("mesh adapter not configured for cluster: {0}")]
    UnknownCluster(String),

    /// A deploy payload could not be serialized into a patch.
    #[error("failed to build patch: {0}")]
    Patch(#[from] serde_json::Error),
}

/// Convenience alias for mesh results.
pub type Result<T> = std::result::Result<T, MeshError>;
