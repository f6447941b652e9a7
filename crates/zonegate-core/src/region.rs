//! Region tags for ingress policy fragments.
//!
//! A region marks which ingress-config subsystem a policy fragment targets.
//! Two fixed sets exist: zone regions (per-zone annotations and location
//! snippets) and global regions (cluster-wide controller configuration).
//! The aggregator only merges fragments whose regions intersect the caller's
//! filter, so zone-scoped and cluster-scoped payloads never bleed into each
//! other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One ingress-config subsystem a policy fragment can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// Per-zone ingress annotations.
    Annotation,
    /// Per-zone nginx location snippet.
    LocationSnippet,
    /// Cluster-wide controller configmap options.
    Configmap,
    /// Cluster-wide nginx main-context snippet.
    MainSnippet,
    /// Cluster-wide nginx http-context snippet.
    HttpSnippet,
    /// Cluster-wide nginx server-context snippet.
    ServerSnippet,
}

impl Region {
    /// True if this region is deployed per zone (annotation level).
    #[must_use]
    pub const fn is_zone_scoped(self) -> bool {
        matches!(self, Self::Annotation | Self::LocationSnippet)
    }

    /// True if this region is deployed cluster-wide (controller level).
    #[must_use]
    pub const fn is_global_scoped(self) -> bool {
        !self.is_zone_scoped()
    }
}

/// An ordered set of regions, used both on records and as a merge filter.
pub type RegionSet = BTreeSet<Region>;

/// The fixed set of zone-scoped regions.
#[must_use]
pub fn zone_regions() -> RegionSet {
    [Region::Annotation, Region::LocationSnippet]
        .into_iter()
        .collect()
}

/// The fixed set of cluster-scoped regions.
#[must_use]
pub fn global_regions() -> RegionSet {
    [
        Region::Configmap,
        Region::MainSnippet,
        Region::HttpSnippet,
        Region::ServerSnippet,
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_sets_are_disjoint_and_complete() {
        let zone = zone_regions();
        let global = global_regions();

        assert!(zone.is_disjoint(&global));
        assert_eq!(zone.len() + global.len(), 6);

        for r in &zone {
            assert!(r.is_zone_scoped());
        }
        for r in &global {
            assert!(r.is_global_scoped());
        }
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Region::LocationSnippet).unwrap();
        assert_eq!(json, "\"location_snippet\"");
    }
}
