//! Deterministic merge of per-category policy fragments.
//!
//! The aggregator folds every `IngressPolicyRecord` whose region set
//! intersects the caller's filter into one deployable change set. Maps are
//! unioned with a hard conflict on duplicate keys; snippet lists are
//! concatenated in application (sequence) order. The nil-vs-empty
//! distinction survives the merge: a region nothing touched stays `None`,
//! a region some category explicitly cleared comes out present and empty.

use std::collections::BTreeMap;

use zonegate_core::{ClusterKey, Region, RegionSet, ZoneId};
use zonegate_mesh::{ControllerState, ZoneAnnotationState};
use zonegate_store::{IngressPolicyRecord, StoreSession};

use crate::error::{ControlError, Result};

/// Delimiter between snippet fragments from different categories.
pub const SNIPPET_DELIMITER: &str = "\n";

/// Aggregated ingress changes for one deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressChanges {
    /// Merged per-zone annotations.
    pub annotations: Option<BTreeMap<String, String>>,
    /// Joined per-zone location snippet.
    pub location_snippet: Option<String>,
    /// Merged controller configmap options.
    pub configmap_options: Option<BTreeMap<String, String>>,
    /// Joined main-context snippet.
    pub main_snippet: Option<String>,
    /// Joined http-context snippet.
    pub http_snippet: Option<String>,
    /// Joined server-context snippet.
    pub server_snippet: Option<String>,
}

impl IngressChanges {
    /// True when no region was touched at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.annotations.is_none()
            && self.location_snippet.is_none()
            && self.configmap_options.is_none()
            && self.main_snippet.is_none()
            && self.http_snippet.is_none()
            && self.server_snippet.is_none()
    }

    /// The zone-scoped portion as a mesh payload.
    #[must_use]
    pub fn annotation_state(&self) -> ZoneAnnotationState {
        ZoneAnnotationState {
            annotations: self.annotations.clone(),
            location_snippet: self.location_snippet.clone(),
        }
    }

    /// The cluster-scoped portion as a mesh payload.
    #[must_use]
    pub fn controller_state(&self) -> ControllerState {
        ControllerState {
            configmap_options: self.configmap_options.clone(),
            main_snippet: self.main_snippet.clone(),
            http_snippet: self.http_snippet.clone(),
            server_snippet: self.server_snippet.clone(),
        }
    }
}

/// Accumulates snippet fragments in sequence order.
#[derive(Default)]
struct SnippetAcc {
    parts: Option<Vec<String>>,
}

impl SnippetAcc {
    fn push(&mut self, lines: &[String]) {
        self.parts.get_or_insert_with(Vec::new).extend_from_slice(lines);
    }

    fn finish(self) -> Option<String> {
        self.parts.map(|p| p.join(SNIPPET_DELIMITER))
    }
}

fn merge_map(
    acc: &mut Option<BTreeMap<String, String>>,
    incoming: &BTreeMap<String, String>,
) -> Result<()> {
    let target = acc.get_or_insert_with(BTreeMap::new);
    for (key, value) in incoming {
        if target.insert(key.clone(), value.clone()).is_some() {
            return Err(ControlError::Conflict { key: key.clone() });
        }
    }
    Ok(())
}

/// Merges policy records into one deployable change set.
pub struct IngressChangeAggregator;

impl IngressChangeAggregator {
    /// Aggregate the records in scope.
    ///
    /// With `zone` present only that zone's records are read (annotation
    /// deploys); without it every record in the cluster is read (controller
    /// deploys). Only regions in `filter` contribute.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Conflict` when two categories claim the same
    /// map key, or a storage error if the scan fails.
    pub fn get_changes<S: StoreSession + ?Sized>(
        session: &S,
        cluster: &ClusterKey,
        filter: &RegionSet,
        zone: Option<&ZoneId>,
    ) -> Result<IngressChanges> {
        let mut records = match zone {
            Some(zone_id) => session.list_records_by_zone(zone_id)?,
            None => session.list_records_by_cluster(cluster)?,
        };
        records.sort_by_key(|r| r.seq);

        // A category's controller fragment is cluster-consistent: every
        // zone carries its own copy, so on a cluster-wide scan exactly one
        // record per category contributes. The most recently updated copy
        // wins; older copies are stale renditions of the same fragment.
        // Conflicts are between categories, not between a category and
        // itself.
        if zone.is_none() {
            let mut latest: BTreeMap<String, (chrono::DateTime<chrono::Utc>, u64)> =
                BTreeMap::new();
            for r in &records {
                let candidate = (r.updated_at, r.seq);
                latest
                    .entry(r.category.clone())
                    .and_modify(|best| {
                        if candidate > *best {
                            *best = candidate;
                        }
                    })
                    .or_insert(candidate);
            }
            records.retain(|r| latest[&r.category] == (r.updated_at, r.seq));
        }

        let mut changes = IngressChanges::default();
        let mut location = SnippetAcc::default();
        let mut main = SnippetAcc::default();
        let mut http = SnippetAcc::default();
        let mut server = SnippetAcc::default();

        for record in &records {
            Self::fold(record, filter, &mut changes, &mut location, &mut main, &mut http, &mut server)?;
        }

        changes.location_snippet = location.finish();
        changes.main_snippet = main.finish();
        changes.http_snippet = http.finish();
        changes.server_snippet = server.finish();

        tracing::debug!(
            cluster = %cluster,
            zone = zone.map(ToString::to_string).unwrap_or_default(),
            records = records.len(),
            "Aggregated ingress changes"
        );
        Ok(changes)
    }

    #[allow(clippy::too_many_arguments)]
    fn fold(
        record: &IngressPolicyRecord,
        filter: &RegionSet,
        changes: &mut IngressChanges,
        location: &mut SnippetAcc,
        main: &mut SnippetAcc,
        http: &mut SnippetAcc,
        server: &mut SnippetAcc,
    ) -> Result<()> {
        for region in record.regions.intersection(filter) {
            match region {
                Region::Annotation => {
                    if let Some(annotations) = &record.annotations {
                        merge_map(&mut changes.annotations, annotations)?;
                    }
                }
                Region::LocationSnippet => {
                    if let Some(lines) = &record.location_snippet {
                        location.push(lines);
                    }
                }
                Region::Configmap => {
                    if let Some(options) = &record.configmap_options {
                        merge_map(&mut changes.configmap_options, options)?;
                    }
                }
                Region::MainSnippet => {
                    if let Some(lines) = &record.main_snippet {
                        main.push(lines);
                    }
                }
                Region::HttpSnippet => {
                    if let Some(lines) = &record.http_snippet {
                        http.push(lines);
                    }
                }
                Region::ServerSnippet => {
                    if let Some(lines) = &record.server_snippet {
                        server.push(lines);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use tempfile::TempDir;
    use zonegate_core::{global_regions, zone_regions};
    use zonegate_store::{RocksStore, Store};

    use super::*;

    fn record(zone: &str, category: &str, seq: u64) -> IngressPolicyRecord {
        IngressPolicyRecord {
            zone_id: ZoneId::new(zone).unwrap(),
            cluster: ClusterKey::new("c1").unwrap(),
            category: category.to_string(),
            annotations: None,
            location_snippet: None,
            configmap_options: None,
            main_snippet: None,
            http_snippet: None,
            server_snippet: None,
            regions: BTreeSet::new(),
            seq,
            updated_at: Utc::now(),
        }
    }

    fn store() -> (TempDir, RocksStore) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn annotation_maps_union_across_categories() {
        let (_dir, store) = store();
        let session = store.session();
        let cluster = ClusterKey::new("c1").unwrap();

        let mut a = record("z1", "cors", 1);
        a.annotations = Some([("a".to_string(), "1".to_string())].into_iter().collect());
        a.regions = a.computed_regions();
        session.put_policy_record(&a).unwrap();

        let mut b = record("z1", "auth", 2);
        b.annotations = Some([("b".to_string(), "2".to_string())].into_iter().collect());
        b.regions = b.computed_regions();
        session.put_policy_record(&b).unwrap();

        let changes = IngressChangeAggregator::get_changes(
            &session,
            &cluster,
            &zone_regions(),
            Some(&ZoneId::new("z1").unwrap()),
        )
        .unwrap();

        let annotations = changes.annotations.unwrap();
        assert_eq!(annotations.len(), 2);
        assert!(changes.configmap_options.is_none());
    }

    #[test]
    fn duplicate_configmap_key_is_a_conflict() {
        let (_dir, store) = store();
        let session = store.session();
        let cluster = ClusterKey::new("c1").unwrap();

        for (zone, category, seq) in [("z1", "a", 1), ("z2", "b", 2)] {
            let mut r = record(zone, category, seq);
            r.configmap_options =
                Some([("proxy-body-size".to_string(), "8m".to_string())].into_iter().collect());
            r.regions = r.computed_regions();
            session.put_policy_record(&r).unwrap();
        }

        let err = IngressChangeAggregator::get_changes(&session, &cluster, &global_regions(), None)
            .unwrap_err();
        assert!(matches!(err, ControlError::Conflict { key } if key == "proxy-body-size"));
    }

    #[test]
    fn snippets_concatenate_in_sequence_order() {
        let (_dir, store) = store();
        let session = store.session();
        let cluster = ClusterKey::new("c1").unwrap();

        let mut second = record("z2", "b", 7);
        second.http_snippet = Some(vec!["second;".to_string()]);
        second.regions = second.computed_regions();
        session.put_policy_record(&second).unwrap();

        let mut first = record("z1", "a", 3);
        first.http_snippet = Some(vec!["first;".to_string()]);
        first.regions = first.computed_regions();
        session.put_policy_record(&first).unwrap();

        let changes = IngressChangeAggregator::get_changes(&session, &cluster, &global_regions(), None)
            .unwrap();
        assert_eq!(changes.http_snippet.unwrap(), "first;\nsecond;");
    }

    #[test]
    fn region_filter_isolates_zone_and_global_scopes() {
        let (_dir, store) = store();
        let session = store.session();
        let cluster = ClusterKey::new("c1").unwrap();

        let mut r = record("z1", "mixed", 1);
        r.annotations = Some([("a".to_string(), "1".to_string())].into_iter().collect());
        r.configmap_options = Some([("k".to_string(), "v".to_string())].into_iter().collect());
        r.regions = r.computed_regions();
        session.put_policy_record(&r).unwrap();

        let zone_changes = IngressChangeAggregator::get_changes(
            &session,
            &cluster,
            &zone_regions(),
            Some(&ZoneId::new("z1").unwrap()),
        )
        .unwrap();
        assert!(zone_changes.annotations.is_some());
        assert!(zone_changes.configmap_options.is_none());

        let global_changes =
            IngressChangeAggregator::get_changes(&session, &cluster, &global_regions(), None)
                .unwrap();
        assert!(global_changes.annotations.is_none());
        assert!(global_changes.configmap_options.is_some());
    }

    #[test]
    fn same_category_across_zones_contributes_once() {
        let (_dir, store) = store();
        let session = store.session();
        let cluster = ClusterKey::new("c1").unwrap();

        for (zone, seq) in [("z1", 1), ("z2", 2)] {
            let mut r = record(zone, "built-in", seq);
            r.configmap_options =
                Some([("keep-alive-requests".to_string(), "1000".to_string())].into_iter().collect());
            r.regions = r.computed_regions();
            session.put_policy_record(&r).unwrap();
        }

        let changes = IngressChangeAggregator::get_changes(&session, &cluster, &global_regions(), None)
            .unwrap();
        let options = changes.configmap_options.unwrap();
        assert_eq!(options.get("keep-alive-requests").unwrap(), "1000");
    }

    #[test]
    fn cluster_scan_folds_the_latest_copy_of_a_category() {
        let (_dir, store) = store();
        let session = store.session();
        let cluster = ClusterKey::new("c1").unwrap();

        let mut stale = record("z1", "built-in", 1);
        stale.configmap_options =
            Some([("keep-alive-requests".to_string(), "1000".to_string())].into_iter().collect());
        stale.regions = stale.computed_regions();
        stale.updated_at = Utc::now() - chrono::Duration::minutes(5);
        session.put_policy_record(&stale).unwrap();

        let mut fresh = record("z2", "built-in", 2);
        fresh.configmap_options =
            Some([("keep-alive-requests".to_string(), "2000".to_string())].into_iter().collect());
        fresh.regions = fresh.computed_regions();
        session.put_policy_record(&fresh).unwrap();

        let changes = IngressChangeAggregator::get_changes(&session, &cluster, &global_regions(), None)
            .unwrap();
        let options = changes.configmap_options.unwrap();
        assert_eq!(options.get("keep-alive-requests").unwrap(), "2000");
    }

    #[test]
    fn explicit_clear_survives_the_merge() {
        let (_dir, store) = store();
        let session = store.session();
        let cluster = ClusterKey::new("c1").unwrap();

        let mut r = record("z1", "cors", 1);
        r.annotations = Some(BTreeMap::new());
        r.regions = r.computed_regions();
        session.put_policy_record(&r).unwrap();

        let changes = IngressChangeAggregator::get_changes(
            &session,
            &cluster,
            &zone_regions(),
            Some(&ZoneId::new("z1").unwrap()),
        )
        .unwrap();

        // Present and empty: deploy clears; None would mean leave alone.
        assert_eq!(changes.annotations, Some(BTreeMap::new()));
        assert!(changes.location_snippet.is_none());
    }
}
