//! Domain types stored in the database.
//!
//! These types represent the persisted state of zones, per-category ingress
//! policy records, and the package entities that own zones.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zonegate_core::{ClusterKey, PackageApiId, PackageId, Region, ZoneId};

/// The kind of routing a zone carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    /// The root zone of a package (covers every API of the package).
    PackageRoot,
    /// A zone bound to a single API of a package.
    PackageApi,
    /// A standalone zone managed outside the package hierarchy.
    Unity,
}

/// Host/path binding of a zone's ingress object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Domain the zone serves. May contain a single leading wildcard label
    /// (`*.example.com`).
    pub host: String,
    /// Matched path prefix, starting with `/`.
    pub path: String,
}

/// A zone record: the unit of routing configuration, mapped 1:1 to one
/// ingress object.
///
/// A zone is owned by exactly one package or package API. The ownership is a
/// weak reference enforced by callers, not by a storage constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    /// Unique identifier for the zone.
    pub id: ZoneId,
    /// Name of the backing ingress object.
    pub name: String,
    /// Kubernetes namespace of the backing ingress object.
    pub namespace: String,
    /// Target cluster (deployment and lock scope).
    pub cluster: ClusterKey,
    /// Project scope.
    pub project_id: String,
    /// Environment scope (dev/test/staging/prod).
    pub env: String,
    /// Routing kind of this zone.
    pub zone_type: ZoneType,
    /// Serialized routing-priority entry published to the proxy, if any.
    /// At most one value is authoritative per zone at any instant; the last
    /// writer under the cluster lock wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kong_policies: Option<String>,
    /// Host/path binding, absent for zones without their own route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteConfig>,
    /// Owning package, if package-owned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<PackageId>,
    /// Owning package API, if API-owned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_api_id: Option<PackageApiId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A per-(zone, category) ingress policy fragment.
///
/// For every snippet/map field, `None` means "leave unchanged" and an
/// explicitly empty value means "clear". The distinction is preserved all
/// the way through aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPolicyRecord {
    /// The zone this fragment applies to.
    pub zone_id: ZoneId,
    /// Target cluster, denormalized from the zone for cluster-wide scans.
    pub cluster: ClusterKey,
    /// Policy category that produced this fragment.
    pub category: String,
    /// Per-zone ingress annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Per-zone location snippet directives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_snippet: Option<Vec<String>>,
    /// Cluster-wide controller configmap options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configmap_options: Option<BTreeMap<String, String>>,
    /// Cluster-wide main-context snippet directives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_snippet: Option<Vec<String>>,
    /// Cluster-wide http-context snippet directives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_snippet: Option<Vec<String>>,
    /// Cluster-wide server-context snippet directives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_snippet: Option<Vec<String>>,
    /// Regions this record contributes to. Always equals the set of
    /// non-`None` fragment fields above.
    pub regions: BTreeSet<Region>,
    /// Application-order sequence number, assigned on first insert and
    /// preserved across upserts.
    pub seq: u64,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl IngressPolicyRecord {
    /// Recompute the region set from which fragment fields are set.
    #[must_use]
    pub fn computed_regions(&self) -> BTreeSet<Region> {
        let mut regions = BTreeSet::new();
        if self.annotations.is_some() {
            regions.insert(Region::Annotation);
        }
        if self.location_snippet.is_some() {
            regions.insert(Region::LocationSnippet);
        }
        if self.configmap_options.is_some() {
            regions.insert(Region::Configmap);
        }
        if self.main_snippet.is_some() {
            regions.insert(Region::MainSnippet);
        }
        if self.http_snippet.is_some() {
            regions.insert(Region::HttpSnippet);
        }
        if self.server_snippet.is_some() {
            regions.insert(Region::ServerSnippet);
        }
        regions
    }
}

/// An API package: the higher-level entity that owns zones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    /// Unique identifier for the package.
    pub id: PackageId,
    /// Human-readable package name, published alongside routing entries.
    pub name: String,
    /// Target cluster the package's zones deploy to.
    pub cluster: ClusterKey,
    /// Project scope.
    pub project_id: String,
    /// Environment scope.
    pub env: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A single API within a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageApi {
    /// Unique identifier for the package API.
    pub id: PackageApiId,
    /// Owning package.
    pub package_id: PackageId,
    /// API path relative to the package root.
    pub api_path: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
