//! Shared types for the apply pipeline.

use serde_json::Value;

/// The stage an apply has reached, in pipeline order.
///
/// The stage determines recovery on failure: anything at or past
/// `MeshDeployed` may have touched infrastructure and needs reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApplyStage {
    /// Validating and parsing operator input.
    Parsing,
    /// The policy record has been staged in the session.
    Persisted,
    /// Mesh-level changes have been deployed.
    MeshDeployed,
    /// The domain-policy table has been published to the proxy.
    ProxyPublished,
    /// The built-in baseline has been re-applied.
    BuiltinReapplied,
    /// The session committed; the apply is durable.
    Committed,
}

/// Result of a successful policy apply.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    /// The DTO that was applied, as the engine normalized it.
    pub dto: Value,
    /// The stage the apply reached. `Committed` for owned sessions,
    /// `BuiltinReapplied` or earlier when the caller owns the session.
    pub stage: ApplyStage,
    /// Optional operator-facing note (bulk operations report counts here).
    pub user_message: Option<String>,
}
