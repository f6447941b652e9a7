//! Built-in baseline policy engine.
//!
//! The built-in category maintains the cluster-wide controller baseline
//! (configmap options, optional server snippets) and the baseline set of
//! proxy-side plugins. It is re-applied after every other category so that
//! an unrelated apply can never clobber the baseline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{ControllerFragment, KongPluginSet, ParseContext, PolicyConfig, PolicyEngine};
use crate::error::{PolicyError, Result};
use crate::BUILTIN_CATEGORY;

const CONFIGMAP_KEEPALIVE: &str = "keep-alive-requests";
const CONFIGMAP_BODY_SIZE: &str = "proxy-body-size";

/// Typed configuration for the built-in baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinConfig {
    /// Keep-alive request limit written to the controller configmap.
    #[serde(default = "BuiltinConfig::default_keepalive")]
    pub keepalive_requests: u32,
    /// Maximum request body size written to the controller configmap.
    #[serde(default = "BuiltinConfig::default_body_size")]
    pub proxy_body_size: String,
    /// Optional baseline server-context snippet directives.
    #[serde(default)]
    pub server_snippet: Option<Vec<String>>,
    /// Baseline proxy plugins enabled for every zone.
    #[serde(default = "BuiltinConfig::default_enabled_plugins")]
    pub enabled_plugins: Vec<String>,
    /// Proxy plugins disabled for every zone.
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
}

impl BuiltinConfig {
    const fn default_keepalive() -> u32 {
        1000
    }

    fn default_body_size() -> String {
        "8m".to_string()
    }

    fn default_enabled_plugins() -> Vec<String> {
        vec!["request-id".to_string()]
    }
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            keepalive_requests: Self::default_keepalive(),
            proxy_body_size: Self::default_body_size(),
            server_snippet: None,
            enabled_plugins: Self::default_enabled_plugins(),
            disabled_plugins: Vec::new(),
        }
    }
}

/// The built-in baseline policy engine.
#[derive(Debug, Default)]
pub struct BuiltinPolicy;

impl BuiltinPolicy {
    /// Create the engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn typed(dto: &Value) -> Result<BuiltinConfig> {
        serde_json::from_value(dto.clone())
            .map_err(|e| PolicyError::Internal(format!("stored built-in config is corrupt: {e}")))
    }
}

impl PolicyEngine for BuiltinPolicy {
    fn category(&self) -> &'static str {
        BUILTIN_CATEGORY
    }

    fn unmarshal_config(&self, raw: &[u8]) -> Result<Value> {
        let config: BuiltinConfig = serde_json::from_slice(raw)
            .map_err(|e| PolicyError::validation(format!("invalid built-in config: {e}")))?;

        if config.keepalive_requests == 0 {
            return Err(PolicyError::validation(
                "keepalive_requests must be greater than zero",
            ));
        }

        serde_json::to_value(config).map_err(|e| PolicyError::Internal(e.to_string()))
    }

    fn parse_config(&self, dto: &Value, _ctx: &ParseContext) -> Result<PolicyConfig> {
        let config = Self::typed(dto)?;

        let mut configmap = BTreeMap::new();
        configmap.insert(
            CONFIGMAP_KEEPALIVE.to_string(),
            config.keepalive_requests.to_string(),
        );
        configmap.insert(CONFIGMAP_BODY_SIZE.to_string(), config.proxy_body_size.clone());

        Ok(PolicyConfig {
            ingress_annotation: None,
            ingress_controller: Some(ControllerFragment {
                configmap_options: Some(configmap),
                main_snippet: None,
                http_snippet: None,
                server_snippet: config.server_snippet.clone(),
            }),
            annotation_reset: false,
            kong_policy_change: true,
        })
    }

    fn create_default_config(&self, _ctx: &ParseContext) -> Value {
        serde_json::to_value(BuiltinConfig::default()).unwrap_or(Value::Null)
    }

    fn merge_deploy_config(
        &self,
        ctx: &ParseContext,
        overrides: &BTreeMap<String, String>,
    ) -> Value {
        let mut config = BuiltinConfig::default();
        if let Some(body_size) = overrides.get("proxy_body_size") {
            config.proxy_body_size = body_size.clone();
        }
        if let Some(keepalive) = overrides
            .get("keepalive_requests")
            .and_then(|v| v.parse().ok())
        {
            config.keepalive_requests = keepalive;
        }
        let _ = ctx;
        serde_json::to_value(config).unwrap_or(Value::Null)
    }

    fn kong_plugins(&self, dto: &Value) -> KongPluginSet {
        Self::typed(dto)
            .map(|config| KongPluginSet {
                enabled: config.enabled_plugins,
                disabled: config.disabled_plugins,
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonegate_core::{ClusterKey, ZoneId};

    fn ctx() -> ParseContext {
        ParseContext {
            zone_id: ZoneId::new("z1").unwrap(),
            cluster: ClusterKey::new("c1").unwrap(),
            project_id: "p1".to_string(),
            env: "prod".to_string(),
            route: None,
        }
    }

    #[test]
    fn default_config_targets_controller_only() {
        let engine = BuiltinPolicy::new();
        let dto = engine.create_default_config(&ctx());
        let parsed = engine.parse_config(&dto, &ctx()).unwrap();

        assert!(parsed.ingress_annotation.is_none());
        assert!(parsed.kong_policy_change);

        let controller = parsed.ingress_controller.unwrap();
        let options = controller.configmap_options.unwrap();
        assert_eq!(options.get(CONFIGMAP_KEEPALIVE).unwrap(), "1000");
        assert_eq!(options.get(CONFIGMAP_BODY_SIZE).unwrap(), "8m");
        assert!(controller.server_snippet.is_none());
    }

    #[test]
    fn zero_keepalive_is_rejected() {
        let engine = BuiltinPolicy::new();
        let err = engine
            .unmarshal_config(br#"{"keepalive_requests": 0}"#)
            .unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn kong_plugins_reflect_config() {
        let engine = BuiltinPolicy::new();
        let dto = engine
            .unmarshal_config(
                br#"{"enabled_plugins": ["request-id", "ip-restriction"], "disabled_plugins": ["debug"]}"#,
            )
            .unwrap();

        let plugins = engine.kong_plugins(&dto);
        assert_eq!(plugins.enabled, vec!["request-id", "ip-restriction"]);
        assert_eq!(plugins.disabled, vec!["debug"]);
    }

    #[test]
    fn deploy_overrides_are_merged() {
        let engine = BuiltinPolicy::new();
        let overrides = [
            ("proxy_body_size".to_string(), "32m".to_string()),
            ("keepalive_requests".to_string(), "200".to_string()),
        ]
        .into_iter()
        .collect();

        let dto = engine.merge_deploy_config(&ctx(), &overrides);
        let config: BuiltinConfig = serde_json::from_value(dto).unwrap();
        assert_eq!(config.proxy_body_size, "32m");
        assert_eq!(config.keepalive_requests, 200);
    }

    #[test]
    fn explicit_empty_server_snippet_is_preserved() {
        let engine = BuiltinPolicy::new();
        let dto = engine
            .unmarshal_config(br#"{"server_snippet": []}"#)
            .unwrap();
        let parsed = engine.parse_config(&dto, &ctx()).unwrap();

        // Empty-but-present means "clear", which must survive parsing.
        let controller = parsed.ingress_controller.unwrap();
        assert_eq!(controller.server_snippet, Some(Vec::new()));
    }
}
