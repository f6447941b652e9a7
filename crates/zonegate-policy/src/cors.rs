//! CORS policy engine.
//!
//! Translates operator CORS settings into per-zone ingress annotations.
//! This category is purely zone-scoped: it never touches controller
//! configuration or the proxy-side plugin set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{AnnotationFragment, ParseContext, PolicyConfig, PolicyEngine};
use crate::error::{PolicyError, Result};

const ANNOTATION_ENABLE: &str = "nginx.ingress.kubernetes.io/enable-cors";
const ANNOTATION_ORIGIN: &str = "nginx.ingress.kubernetes.io/cors-allow-origin";
const ANNOTATION_METHODS: &str = "nginx.ingress.kubernetes.io/cors-allow-methods";
const ANNOTATION_HEADERS: &str = "nginx.ingress.kubernetes.io/cors-allow-headers";
const ANNOTATION_CREDENTIALS: &str = "nginx.ingress.kubernetes.io/cors-allow-credentials";
const ANNOTATION_MAX_AGE: &str = "nginx.ingress.kubernetes.io/cors-max-age";

/// Typed configuration for the CORS category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Whether CORS handling is active for the zone.
    #[serde(default = "CorsConfig::default_enabled")]
    pub enabled: bool,
    /// Allowed origins, comma-separated or `*`.
    #[serde(default)]
    pub allow_origins: String,
    /// Allowed methods, comma-separated. Controller default when absent.
    #[serde(default)]
    pub allow_methods: Option<String>,
    /// Allowed headers, comma-separated. Controller default when absent.
    #[serde(default)]
    pub allow_headers: Option<String>,
    /// Whether credentials may be included.
    #[serde(default)]
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    #[serde(default)]
    pub max_age_seconds: Option<u32>,
}

impl CorsConfig {
    const fn default_enabled() -> bool {
        true
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: String::new(),
            allow_methods: None,
            allow_headers: None,
            allow_credentials: false,
            max_age_seconds: None,
        }
    }
}

/// The CORS policy engine.
#[derive(Debug, Default)]
pub struct CorsPolicy;

impl CorsPolicy {
    /// Create the engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn typed(dto: &Value) -> Result<CorsConfig> {
        serde_json::from_value(dto.clone())
            .map_err(|e| PolicyError::Internal(format!("stored cors config is corrupt: {e}")))
    }
}

impl PolicyEngine for CorsPolicy {
    fn category(&self) -> &'static str {
        "cors"
    }

    fn unmarshal_config(&self, raw: &[u8]) -> Result<Value> {
        let config: CorsConfig = serde_json::from_slice(raw)
            .map_err(|e| PolicyError::validation(format!("invalid cors config: {e}")))?;

        if config.enabled && config.allow_origins.trim().is_empty() {
            return Err(PolicyError::validation(
                "cors requires at least one allowed origin",
            ));
        }

        serde_json::to_value(config).map_err(|e| PolicyError::Internal(e.to_string()))
    }

    fn parse_config(&self, dto: &Value, _ctx: &ParseContext) -> Result<PolicyConfig> {
        let config = Self::typed(dto)?;

        let annotations = if config.enabled {
            let mut map = BTreeMap::new();
            map.insert(ANNOTATION_ENABLE.to_string(), "true".to_string());
            map.insert(ANNOTATION_ORIGIN.to_string(), config.allow_origins.clone());
            if let Some(methods) = &config.allow_methods {
                map.insert(ANNOTATION_METHODS.to_string(), methods.clone());
            }
            if let Some(headers) = &config.allow_headers {
                map.insert(ANNOTATION_HEADERS.to_string(), headers.clone());
            }
            if config.allow_credentials {
                map.insert(ANNOTATION_CREDENTIALS.to_string(), "true".to_string());
            }
            if let Some(max_age) = config.max_age_seconds {
                map.insert(ANNOTATION_MAX_AGE.to_string(), max_age.to_string());
            }
            map
        } else {
            // Explicitly empty: clear previously applied CORS annotations.
            BTreeMap::new()
        };

        Ok(PolicyConfig {
            ingress_annotation: Some(AnnotationFragment {
                annotations: Some(annotations),
                location_snippet: None,
            }),
            ingress_controller: None,
            annotation_reset: !config.enabled,
            kong_policy_change: false,
        })
    }

    fn need_reset_annotation(&self, dto: &Value) -> bool {
        Self::typed(dto).map(|c| !c.enabled).unwrap_or(false)
    }

    fn create_default_config(&self, _ctx: &ParseContext) -> Value {
        serde_json::to_value(CorsConfig::default()).unwrap_or(Value::Null)
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
    fn minimal_config_yields_two_annotations() {
        let engine = CorsPolicy::new();
        let dto = engine
            .unmarshal_config(br#"{"allow_origins": "https://shop.example.com"}"#)
            .unwrap();

        let parsed = engine.parse_config(&dto, &ctx()).unwrap();
        let fragment = parsed.ingress_annotation.unwrap();
        let annotations = fragment.annotations.unwrap();

        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations.get(ANNOTATION_ENABLE).unwrap(), "true");
        assert_eq!(
            annotations.get(ANNOTATION_ORIGIN).unwrap(),
            "https://shop.example.com"
        );
        assert!(!parsed.annotation_reset);
        assert!(!parsed.kong_policy_change);
    }

    #[test]
    fn full_config_adds_optional_annotations() {
        let engine = CorsPolicy::new();
        let dto = engine
            .unmarshal_config(
                br#"{
                    "allow_origins": "*",
                    "allow_methods": "GET,POST",
                    "allow_headers": "X-Request-Id",
                    "allow_credentials": true,
                    "max_age_seconds": 600
                }"#,
            )
            .unwrap();

        let parsed = engine.parse_config(&dto, &ctx()).unwrap();
        let annotations = parsed.ingress_annotation.unwrap().annotations.unwrap();
        assert_eq!(annotations.len(), 6);
        assert_eq!(annotations.get(ANNOTATION_MAX_AGE).unwrap(), "600");
    }

    #[test]
    fn enabled_without_origin_is_rejected_with_message() {
        let engine = CorsPolicy::new();
        let err = engine.unmarshal_config(br"{}").unwrap_err();

        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "cors requires at least one allowed origin");
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        let engine = CorsPolicy::new();
        let err = engine.unmarshal_config(b"not json").unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn disabling_clears_annotations_and_requests_reset() {
        let engine = CorsPolicy::new();
        let dto = engine.unmarshal_config(br#"{"enabled": false}"#).unwrap();

        assert!(engine.need_reset_annotation(&dto));

        let parsed = engine.parse_config(&dto, &ctx()).unwrap();
        let annotations = parsed.ingress_annotation.unwrap().annotations.unwrap();
        assert!(annotations.is_empty());
        assert!(parsed.annotation_reset);
    }

    #[test]
    fn default_config_is_disabled() {
        let engine = CorsPolicy::new();
        let dto = engine.create_default_config(&ctx());
        let config: CorsConfig = serde_json::from_value(dto).unwrap();
        assert!(!config.enabled);
    }
}
