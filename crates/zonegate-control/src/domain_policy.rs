//! Routing-priority table publishing.
//!
//! Every zone that carries proxy-side policy serializes one
//! `DomainPolicyEntry` into `Zone.kong_policies`. The publisher collects
//! those entries for a cluster, orders them most-specific-first, and pushes
//! the result as the cluster's single `domain-policy` plugin instance, so
//! the data plane can take the first regex that matches.

use serde::{Deserialize, Serialize};
use zonegate_core::{ClusterKey, ZoneId};
use zonegate_proxy::{domain_policy_plugin_id, DomainPolicyConfig, ProxyAdapter};
use zonegate_store::{StoreSession, Zone};

use crate::error::{ControlError, Result};

/// Score bonus for exact (non-wildcard) hosts. Path length is always far
/// below this, so path specificity never lifts a wildcard entry above an
/// exact one.
const EXACT_HOST_TIER: u64 = 1_000_000;

/// One zone's routing-priority entry, serialized into `Zone.kong_policies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicyEntry {
    /// The zone this entry routes to.
    pub zone_id: ZoneId,
    /// Host + path match pattern.
    pub regex: String,
    /// Composite specificity score; higher publishes earlier.
    pub priority: u64,
    /// Plugin ids enabled for matching traffic.
    pub enabled_plugin_ids: Vec<String>,
    /// Plugin ids disabled for matching traffic.
    pub disabled_plugin_ids: Vec<String>,
    /// Whether matching traffic is admitted at all.
    pub allow: bool,
    /// Owning package name. Backfilled at publish time when empty.
    #[serde(default)]
    pub package_name: String,
    /// Project scope.
    pub project_id: String,
    /// Environment scope.
    pub env: String,
}

/// Composite specificity score for a host/path binding.
///
/// Exact hosts rank in a tier above wildcard hosts; within a tier, longer
/// matched paths rank higher.
#[must_use]
pub fn routing_score(host: &str, path: &str) -> u64 {
    let tier = if host.starts_with("*.") {
        0
    } else {
        EXACT_HOST_TIER
    };
    tier + path.len() as u64
}

/// Builds and publishes the per-cluster routing-priority table.
pub struct DomainPolicyPublisher;

impl DomainPolicyPublisher {
    /// Publish the table for a cluster from the session's view of its zones.
    ///
    /// # Errors
    ///
    /// Returns a storage error if zones cannot be read, an internal error if
    /// a stored entry is corrupt, or a proxy error if the push fails.
    pub async fn publish<S: StoreSession + ?Sized>(
        session: &S,
        proxy: &dyn ProxyAdapter,
        cluster: &ClusterKey,
    ) -> Result<DomainPolicyConfig> {
        let zones = session.list_zones_by_cluster(cluster)?;

        let mut entries = Vec::new();
        for zone in &zones {
            let Some(raw) = zone.kong_policies.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };
            let mut entry: DomainPolicyEntry = serde_json::from_str(raw).map_err(|e| {
                ControlError::Internal(format!(
                    "corrupt kong_policies on zone {}: {e}",
                    zone.id
                ))
            })?;
            if entry.package_name.is_empty() {
                entry.package_name = Self::package_name(session, zone)?;
            }
            entries.push(entry);
        }

        // Most-specific-first; zone id breaks score ties deterministically.
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.zone_id.cmp(&b.zone_id))
        });

        let mut config = DomainPolicyConfig::default();
        for entry in entries {
            config.push_rule(
                entry.regex,
                entry.zone_id.to_string(),
                entry.enabled_plugin_ids.join(","),
                entry.disabled_plugin_ids.join(","),
                entry.allow,
                entry.package_name,
                entry.project_id,
                entry.env,
            );
        }

        let plugin_id = domain_policy_plugin_id(cluster);
        if config.is_empty() {
            proxy.remove_plugin(cluster, &plugin_id).await?;
            tracing::info!(cluster = %cluster, "Removed empty routing-priority table");
        } else {
            proxy
                .create_or_update_plugin_by_id(cluster, &plugin_id, &config)
                .await?;
            tracing::info!(cluster = %cluster, rules = config.len(), "Published routing-priority table");
        }
        Ok(config)
    }

    fn package_name<S: StoreSession + ?Sized>(session: &S, zone: &Zone) -> Result<String> {
        let package_id = if let Some(package_id) = &zone.package_id {
            Some(package_id.clone())
        } else if let Some(api_id) = &zone.package_api_id {
            session.get_package_api(api_id)?.map(|api| api.package_id)
        } else {
            None
        };

        let Some(package_id) = package_id else {
            return Ok(String::new());
        };
        Ok(session
            .get_package(&package_id)?
            .map(|p| p.name)
            .unwrap_or_default())
    }
}
