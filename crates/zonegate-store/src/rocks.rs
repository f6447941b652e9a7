//! `RocksDB` storage implementation.
//!
//! `RocksStore` owns the database; `RocksSession` is the staged-write overlay
//! implementing [`StoreSession`]. Staged writes live in an in-memory map
//! keyed by (column family, key) and are flushed as a single `WriteBatch` on
//! commit.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use zonegate_core::{ClusterKey, PackageApiId, PackageId, ZoneId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf, RECORD_SEQ_KEY};
use crate::types::{IngressPolicyRecord, Package, PackageApi, Zone};
use crate::{Store, StoreSession};

type Db = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Store for RocksStore {
    type Session = RocksSession;

    fn session(&self) -> RocksSession {
        RocksSession {
            db: Arc::clone(&self.db),
            staged: Mutex::new(BTreeMap::new()),
        }
    }
}

/// Staged write: `Some` is a pending put, `None` a pending delete.
type Staged = BTreeMap<(&'static str, Vec<u8>), Option<Vec<u8>>>;

/// A session over a `RocksStore`.
pub struct RocksSession {
    db: Arc<Db>,
    staged: Mutex<Staged>,
}

impl RocksSession {
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn stage_put(&self, cf_name: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.staged.lock().insert((cf_name, key), Some(value));
    }

    fn stage_delete(&self, cf_name: &'static str, key: Vec<u8>) {
        self.staged.lock().insert((cf_name, key), None);
    }

    /// Read through the staged overlay, falling back to the base database.
    fn get_raw(&self, cf_name: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.lock().get(&(cf_name, key.to_vec())) {
            return Ok(staged.clone());
        }
        let handle = self.cf(cf_name)?;
        self.db
            .get_cf(&handle, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Prefix scan over base state with the staged overlay applied.
    fn scan_prefix(&self, cf_name: &'static str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.cf(cf_name)?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        let iter = self
            .db
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            merged.insert(key.to_vec(), value.to_vec());
        }

        let staged = self.staged.lock();
        for ((staged_cf, key), value) in staged.iter() {
            if *staged_cf != cf_name || !key.starts_with(prefix) {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    fn get_record_by_key(&self, primary_key: &[u8]) -> Result<Option<IngressPolicyRecord>> {
        self.get_raw(cf::POLICY_RECORDS, primary_key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }
}

impl StoreSession for RocksSession {
    // =========================================================================
    // Zone Operations
    // =========================================================================

    fn put_zone(&self, zone: &Zone) -> Result<()> {
        let zone_key = keys::zone_key(&zone.id);
        let value = Self::serialize(zone)?;

        // Clean up index entries if the cluster or owning package changed.
        if let Some(old) = self.get_zone(&zone.id)? {
            if old.cluster != zone.cluster {
                self.stage_delete(
                    cf::ZONES_BY_CLUSTER,
                    keys::cluster_zone_key(&old.cluster, &zone.id),
                );
            }
            if old.package_id != zone.package_id {
                if let Some(old_pkg) = &old.package_id {
                    self.stage_delete(
                        cf::ZONES_BY_PACKAGE,
                        keys::package_zone_key(old_pkg, &zone.id),
                    );
                }
            }
        }

        self.stage_put(cf::ZONES, zone_key.clone(), value);
        self.stage_put(
            cf::ZONES_BY_CLUSTER,
            keys::cluster_zone_key(&zone.cluster, &zone.id),
            zone_key.clone(),
        );
        if let Some(package_id) = &zone.package_id {
            self.stage_put(
                cf::ZONES_BY_PACKAGE,
                keys::package_zone_key(package_id, &zone.id),
                zone_key,
            );
        }

        Ok(())
    }

    fn get_zone(&self, zone_id: &ZoneId) -> Result<Option<Zone>> {
        self.get_raw(cf::ZONES, &keys::zone_key(zone_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn delete_zone(&self, zone_id: &ZoneId) -> Result<()> {
        let zone = self.get_zone(zone_id)?.ok_or(StoreError::NotFound)?;

        self.stage_delete(cf::ZONES, keys::zone_key(zone_id));
        self.stage_delete(
            cf::ZONES_BY_CLUSTER,
            keys::cluster_zone_key(&zone.cluster, zone_id),
        );
        if let Some(package_id) = &zone.package_id {
            self.stage_delete(
                cf::ZONES_BY_PACKAGE,
                keys::package_zone_key(package_id, zone_id),
            );
        }

        Ok(())
    }

    fn list_zones_by_cluster(&self, cluster: &ClusterKey) -> Result<Vec<Zone>> {
        let prefix = keys::cluster_prefix(cluster);
        let mut zones = Vec::new();
        for (_, primary_key) in self.scan_prefix(cf::ZONES_BY_CLUSTER, &prefix)? {
            if let Some(data) = self.get_raw(cf::ZONES, &primary_key)? {
                zones.push(Self::deserialize(&data)?);
            }
        }
        Ok(zones)
    }

    fn list_zones_by_package(&self, package_id: &PackageId) -> Result<Vec<Zone>> {
        let prefix = keys::package_prefix(package_id);
        let mut zones = Vec::new();
        for (_, primary_key) in self.scan_prefix(cf::ZONES_BY_PACKAGE, &prefix)? {
            if let Some(data) = self.get_raw(cf::ZONES, &primary_key)? {
                zones.push(Self::deserialize(&data)?);
            }
        }
        Ok(zones)
    }

    // =========================================================================
    // Policy Record Operations
    // =========================================================================

    fn put_policy_record(&self, record: &IngressPolicyRecord) -> Result<()> {
        let record_key = keys::record_key(&record.zone_id, &record.category);
        let value = Self::serialize(record)?;

        self.stage_put(cf::POLICY_RECORDS, record_key.clone(), value);
        self.stage_put(
            cf::RECORDS_BY_CLUSTER,
            keys::cluster_record_key(&record.cluster, &record.zone_id, &record.category),
            record_key,
        );

        Ok(())
    }

    fn get_policy_record(
        &self,
        zone_id: &ZoneId,
        category: &str,
    ) -> Result<Option<IngressPolicyRecord>> {
        self.get_record_by_key(&keys::record_key(zone_id, category))
    }

    fn delete_policy_record(&self, zone_id: &ZoneId, category: &str) -> Result<()> {
        let record = self
            .get_policy_record(zone_id, category)?
            .ok_or(StoreError::NotFound)?;

        self.stage_delete(cf::POLICY_RECORDS, keys::record_key(zone_id, category));
        self.stage_delete(
            cf::RECORDS_BY_CLUSTER,
            keys::cluster_record_key(&record.cluster, zone_id, category),
        );

        Ok(())
    }

    fn list_records_by_zone(&self, zone_id: &ZoneId) -> Result<Vec<IngressPolicyRecord>> {
        let prefix = keys::record_zone_prefix(zone_id);
        let mut records = Vec::new();
        for (_, data) in self.scan_prefix(cf::POLICY_RECORDS, &prefix)? {
            records.push(Self::deserialize(&data)?);
        }
        Ok(records)
    }

    fn list_records_by_cluster(&self, cluster: &ClusterKey) -> Result<Vec<IngressPolicyRecord>> {
        let prefix = keys::cluster_prefix(cluster);
        let mut records = Vec::new();
        for (_, primary_key) in self.scan_prefix(cf::RECORDS_BY_CLUSTER, &prefix)? {
            if let Some(record) = self.get_record_by_key(&primary_key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // =========================================================================
    // Package Operations
    // =========================================================================

    fn put_package(&self, package: &Package) -> Result<()> {
        let value = Self::serialize(package)?;
        self.stage_put(cf::PACKAGES, package.id.as_bytes().to_vec(), value);
        Ok(())
    }

    fn get_package(&self, package_id: &PackageId) -> Result<Option<Package>> {
        self.get_raw(cf::PACKAGES, package_id.as_bytes())?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_package_api(&self, api: &PackageApi) -> Result<()> {
        let value = Self::serialize(api)?;
        self.stage_put(cf::PACKAGE_APIS, api.id.as_bytes().to_vec(), value);
        Ok(())
    }

    fn get_package_api(&self, api_id: &PackageApiId) -> Result<Option<PackageApi>> {
        self.get_raw(cf::PACKAGE_APIS, api_id.as_bytes())?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    // =========================================================================
    // Sequencing and Transaction Control
    // =========================================================================

    fn next_record_seq(&self) -> Result<u64> {
        let current = self
            .get_raw(cf::META, RECORD_SEQ_KEY)?
            .map(|data| {
                let bytes: [u8; 8] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Serialization("bad sequence counter".to_string()))?;
                Ok::<u64, StoreError>(u64::from_le_bytes(bytes))
            })
            .transpose()?
            .unwrap_or(0);

        let next = current + 1;
        self.stage_put(cf::META, RECORD_SEQ_KEY.to_vec(), next.to_le_bytes().to_vec());
        Ok(next)
    }

    fn commit(self) -> Result<()> {
        let staged = self.staged.into_inner();
        if staged.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        for ((cf_name, key), value) in &staged {
            let handle = self
                .db
                .cf_handle(cf_name)
                .ok_or_else(|| StoreError::Database(format!("column family not found: {cf_name}")))?;
            match value {
                Some(v) => batch.put_cf(&handle, key, v),
                None => batch.delete_cf(&handle, key),
            }
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(writes = staged.len(), "Committed session");
        Ok(())
    }

    fn rollback(self) {
        let staged = self.staged.into_inner();
        tracing::debug!(discarded = staged.len(), "Rolled back session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RouteConfig, ZoneType};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn test_zone(id: &str, cluster: &str) -> Zone {
        Zone {
            id: ZoneId::new(id).unwrap(),
            name: format!("ingress-{id}"),
            namespace: "gateway".to_string(),
            cluster: ClusterKey::new(cluster).unwrap(),
            project_id: "p1".to_string(),
            env: "prod".to_string(),
            zone_type: ZoneType::PackageApi,
            kong_policies: None,
            route: Some(RouteConfig {
                host: "api.example.com".to_string(),
                path: "/orders".to_string(),
            }),
            package_id: Some(PackageId::new("pkg1").unwrap()),
            package_api_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_record(zone: &Zone, category: &str, seq: u64) -> IngressPolicyRecord {
        IngressPolicyRecord {
            zone_id: zone.id.clone(),
            cluster: zone.cluster.clone(),
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

    #[test]
    fn zone_crud_within_session() {
        let (store, _dir) = create_test_store();
        let session = store.session();
        let zone = test_zone("z1", "c1");

        session.put_zone(&zone).unwrap();

        // Read-your-writes before commit.
        let read = session.get_zone(&zone.id).unwrap().unwrap();
        assert_eq!(read.name, zone.name);

        session.delete_zone(&zone.id).unwrap();
        assert!(session.get_zone(&zone.id).unwrap().is_none());
    }

    #[test]
    fn uncommitted_writes_are_invisible() {
        let (store, _dir) = create_test_store();
        let zone = test_zone("z1", "c1");

        let session = store.session();
        session.put_zone(&zone).unwrap();

        // A parallel session sees nothing until commit.
        let other = store.session();
        assert!(other.get_zone(&zone.id).unwrap().is_none());

        session.commit().unwrap();

        let after = store.session();
        assert!(after.get_zone(&zone.id).unwrap().is_some());
    }

    #[test]
    fn rollback_discards_writes() {
        let (store, _dir) = create_test_store();
        let zone = test_zone("z1", "c1");

        let session = store.session();
        session.put_zone(&zone).unwrap();
        session.rollback();

        let after = store.session();
        assert!(after.get_zone(&zone.id).unwrap().is_none());
    }

    #[test]
    fn cluster_index_merges_staged_and_committed() {
        let (store, _dir) = create_test_store();
        let cluster = ClusterKey::new("c1").unwrap();

        let setup = store.session();
        setup.put_zone(&test_zone("z1", "c1")).unwrap();
        setup.commit().unwrap();

        let session = store.session();
        session.put_zone(&test_zone("z2", "c1")).unwrap();
        session.put_zone(&test_zone("z3", "other")).unwrap();

        let zones = session.list_zones_by_cluster(&cluster).unwrap();
        let ids: Vec<_> = zones.iter().map(|z| z.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["z1", "z2"]);
    }

    #[test]
    fn package_index_lists_owned_zones() {
        let (store, _dir) = create_test_store();
        let session = store.session();

        session.put_zone(&test_zone("z1", "c1")).unwrap();
        let mut unowned = test_zone("z2", "c1");
        unowned.package_id = None;
        session.put_zone(&unowned).unwrap();

        let pkg = PackageId::new("pkg1").unwrap();
        let zones = session.list_zones_by_package(&pkg).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id.as_str(), "z1");
    }

    #[test]
    fn policy_record_crud_and_cluster_scan() {
        let (store, _dir) = create_test_store();
        let session = store.session();
        let zone = test_zone("z1", "c1");
        session.put_zone(&zone).unwrap();

        session.put_policy_record(&test_record(&zone, "cors", 1)).unwrap();
        session
            .put_policy_record(&test_record(&zone, "built-in", 2))
            .unwrap();

        let by_zone = session.list_records_by_zone(&zone.id).unwrap();
        assert_eq!(by_zone.len(), 2);

        let by_cluster = session
            .list_records_by_cluster(&zone.cluster)
            .unwrap();
        assert_eq!(by_cluster.len(), 2);

        session.delete_policy_record(&zone.id, "cors").unwrap();
        assert!(session.get_policy_record(&zone.id, "cors").unwrap().is_none());
        assert_eq!(session.list_records_by_cluster(&zone.cluster).unwrap().len(), 1);
    }

    #[test]
    fn record_upsert_overwrites_in_place() {
        let (store, _dir) = create_test_store();
        let session = store.session();
        let zone = test_zone("z1", "c1");

        let mut record = test_record(&zone, "cors", 1);
        session.put_policy_record(&record).unwrap();

        record.annotations = Some(
            [("k".to_string(), "v".to_string())]
                .into_iter()
                .collect(),
        );
        session.put_policy_record(&record).unwrap();

        let records = session.list_records_by_zone(&zone.id).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].annotations.is_some());
    }

    #[test]
    fn sequence_counter_survives_commit() {
        let (store, _dir) = create_test_store();

        let first = store.session();
        assert_eq!(first.next_record_seq().unwrap(), 1);
        assert_eq!(first.next_record_seq().unwrap(), 2);
        first.commit().unwrap();

        let second = store.session();
        assert_eq!(second.next_record_seq().unwrap(), 3);
        // Rolled back sessions give their numbers back.
        second.rollback();

        let third = store.session();
        assert_eq!(third.next_record_seq().unwrap(), 3);
    }

    #[test]
    fn package_crud() {
        let (store, _dir) = create_test_store();
        let session = store.session();

        let package = Package {
            id: PackageId::new("pkg1").unwrap(),
            name: "orders".to_string(),
            cluster: ClusterKey::new("c1").unwrap(),
            project_id: "p1".to_string(),
            env: "prod".to_string(),
            created_at: Utc::now(),
        };
        session.put_package(&package).unwrap();

        let read = session.get_package(&package.id).unwrap().unwrap();
        assert_eq!(read.name, "orders");

        let api = PackageApi {
            id: PackageApiId::new("api1").unwrap(),
            package_id: package.id.clone(),
            api_path: "/orders/list".to_string(),
            created_at: Utc::now(),
        };
        session.put_package_api(&api).unwrap();
        assert!(session.get_package_api(&api.id).unwrap().is_some());
    }
}
