//! Deploy payload types.

use std::collections::BTreeMap;

/// Desired ingress-controller state for one cluster.
///
/// `None` fields are left untouched on the controller; present fields
/// replace the platform-managed portion of that region, including an empty
/// value which clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerState {
    /// Controller configmap options.
    pub configmap_options: Option<BTreeMap<String, String>>,
    /// Joined main-context snippet.
    pub main_snippet: Option<String>,
    /// Joined http-context snippet.
    pub http_snippet: Option<String>,
    /// Joined server-context snippet.
    pub server_snippet: Option<String>,
}

impl ControllerState {
    /// True when nothing would be deployed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.configmap_options.is_none()
            && self.main_snippet.is_none()
            && self.http_snippet.is_none()
            && self.server_snippet.is_none()
    }
}

/// Desired per-zone ingress state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneAnnotationState {
    /// Full desired annotation map, when annotations are being deployed.
    pub annotations: Option<BTreeMap<String, String>>,
    /// Joined location-context snippet.
    pub location_snippet: Option<String>,
}

impl ZoneAnnotationState {
    /// True when nothing would be deployed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.annotations.is_none() && self.location_snippet.is_none()
    }
}

/// Spec for creating a zone's ingress object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSpec {
    /// Namespace the ingress lives in.
    pub namespace: String,
    /// Ingress object name, derived from the zone name.
    pub name: String,
    /// Host the zone serves.
    pub host: String,
    /// Path prefix the zone serves.
    pub path: String,
    /// Backend service name.
    pub service_name: String,
    /// Backend service port.
    pub service_port: i32,
}
