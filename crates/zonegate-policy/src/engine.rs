//! The `PolicyEngine` capability trait and its data contracts.

use std::collections::BTreeMap;

use serde_json::Value;
use zonegate_core::{ClusterKey, ZoneId};
use zonegate_store::RouteConfig;

use crate::error::Result;

/// Context handed to an engine when parsing a config for a concrete zone.
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// The zone being configured.
    pub zone_id: ZoneId,
    /// Target cluster of the zone.
    pub cluster: ClusterKey,
    /// Project scope.
    pub project_id: String,
    /// Environment scope.
    pub env: String,
    /// Host/path binding of the zone, if any.
    pub route: Option<RouteConfig>,
}

/// Zone-scoped fragment of a parsed policy.
///
/// `None` fields mean "leave unchanged"; explicitly empty values mean
/// "clear".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationFragment {
    /// Per-zone ingress annotations.
    pub annotations: Option<BTreeMap<String, String>>,
    /// Per-zone location snippet directives.
    pub location_snippet: Option<Vec<String>>,
}

/// Cluster-scoped fragment of a parsed policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerFragment {
    /// Controller configmap options.
    pub configmap_options: Option<BTreeMap<String, String>>,
    /// Main-context snippet directives.
    pub main_snippet: Option<Vec<String>>,
    /// Http-context snippet directives.
    pub http_snippet: Option<Vec<String>>,
    /// Server-context snippet directives.
    pub server_snippet: Option<Vec<String>>,
}

/// The deployable output of `parse_config`.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    /// Zone-scoped changes, if the policy touches annotation regions.
    pub ingress_annotation: Option<AnnotationFragment>,
    /// Cluster-scoped changes, if the policy touches controller regions.
    pub ingress_controller: Option<ControllerFragment>,
    /// True if stale annotations must be cleared before controller-level
    /// changes are deployed.
    pub annotation_reset: bool,
    /// True if the zone's proxy-side plugin set changed and the
    /// domain-policy table must be republished.
    pub kong_policy_change: bool,
}

/// Proxy-side plugin ids a policy enables or disables for a zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KongPluginSet {
    /// Plugin ids to enable.
    pub enabled: Vec<String>,
    /// Plugin ids to disable.
    pub disabled: Vec<String>,
}

/// A traffic-policy category implementation.
///
/// Engines own a typed config; the `serde_json::Value` at the trait
/// boundary is the category's DTO, deserialized into the typed form inside
/// each method.
pub trait PolicyEngine: std::fmt::Debug + Send + Sync {
    /// The category string this engine serves.
    fn category(&self) -> &'static str;

    /// Validate raw operator input and return the typed DTO.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Validation` with a user-facing message if the
    /// input is rejected.
    fn unmarshal_config(&self, raw: &[u8]) -> Result<Value>;

    /// Translate a DTO into deployable fragments for a concrete zone.
    ///
    /// # Errors
    ///
    /// Returns an error if the DTO is structurally invalid for this zone.
    fn parse_config(&self, dto: &Value, ctx: &ParseContext) -> Result<PolicyConfig>;

    /// Return the currently effective DTO for a zone, falling back to the
    /// category default when nothing was applied yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored DTO cannot be reconstructed.
    fn get_config(&self, ctx: &ParseContext, stored: Option<&Value>) -> Result<Value> {
        match stored {
            Some(dto) => Ok(dto.clone()),
            None => Ok(self.create_default_config(ctx)),
        }
    }

    /// True if applying this DTO requires clearing stale annotations before
    /// controller-level changes.
    fn need_reset_annotation(&self, dto: &Value) -> bool {
        let _ = dto;
        false
    }

    /// Build the category's default DTO for a zone.
    fn create_default_config(&self, ctx: &ParseContext) -> Value;

    /// Merge deployment-supplied key/value overrides into the default DTO.
    fn merge_deploy_config(&self, ctx: &ParseContext, overrides: &BTreeMap<String, String>) -> Value {
        let _ = overrides;
        self.create_default_config(ctx)
    }

    /// Proxy-side plugin ids this DTO enables or disables.
    fn kong_plugins(&self, dto: &Value) -> KongPluginSet {
        let _ = dto;
        KongPluginSet::default()
    }
}
