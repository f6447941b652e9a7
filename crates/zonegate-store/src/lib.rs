//! `RocksDB` persistence layer for zonegate.
//!
//! This crate provides persistent storage for zones, per-category ingress
//! policy records, and packages, using `RocksDB` with column families for
//! efficient indexing.
//!
//! All reads and writes go through a **session**: a staged-write overlay on
//! top of the committed database. Writes made in a session are visible to
//! subsequent reads in the same session (read-your-writes) but invisible to
//! other sessions until `commit`, which applies the whole session atomically
//! as one `WriteBatch`. Dropping or rolling back a session discards its
//! staged writes. Every multi-step policy apply runs inside one session so
//! that the mesh deploy and the proxy publish observe the same state.
//!
//! # Example
//!
//! ```no_run
//! use zonegate_store::{RocksStore, Store, StoreSession};
//! use zonegate_core::ClusterKey;
//!
//! let store = RocksStore::open("/tmp/zonegate-db").unwrap();
//! let session = store.session();
//!
//! let cluster = ClusterKey::new("prod-east").unwrap();
//! let zones = session.list_zones_by_cluster(&cluster).unwrap();
//! # let _ = zones;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::{RocksSession, RocksStore};
pub use types::{IngressPolicyRecord, Package, PackageApi, RouteConfig, Zone, ZoneType};

use zonegate_core::{ClusterKey, PackageApiId, PackageId, ZoneId};

/// Factory for transactional sessions.
///
/// Implementations must hand out independent sessions; sessions are never
/// shared across concurrent tasks.
pub trait Store: Send + Sync + 'static {
    /// The session type produced by this store.
    type Session: StoreSession + 'static;

    /// Open a new session over the current committed state.
    fn session(&self) -> Self::Session;
}

/// A session-scoped view of the database.
///
/// All mutation methods stage writes; nothing is durable until [`commit`]
/// succeeds. Reads observe staged writes of the same session.
///
/// [`commit`]: StoreSession::commit
pub trait StoreSession: Send + Sync {
    // =========================================================================
    // Zone Operations
    // =========================================================================

    /// Insert or update a zone record, maintaining the cluster and package
    /// indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_zone(&self, zone: &Zone) -> Result<()>;

    /// Get a zone by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_zone(&self, zone_id: &ZoneId) -> Result<Option<Zone>>;

    /// Delete a zone and its index entries.
    ///
    /// Policy records of the zone are not removed here; callers tearing down
    /// a zone delete them explicitly.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the zone doesn't exist.
    fn delete_zone(&self, zone_id: &ZoneId) -> Result<()>;

    /// List all zones in a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_zones_by_cluster(&self, cluster: &ClusterKey) -> Result<Vec<Zone>>;

    /// List all zones owned by a package.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_zones_by_package(&self, package_id: &PackageId) -> Result<Vec<Zone>>;

    // =========================================================================
    // Policy Record Operations
    // =========================================================================

    /// Insert or update the policy record for a (zone, category) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_policy_record(&self, record: &IngressPolicyRecord) -> Result<()>;

    /// Get the policy record for a (zone, category) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_policy_record(
        &self,
        zone_id: &ZoneId,
        category: &str,
    ) -> Result<Option<IngressPolicyRecord>>;

    /// Delete the policy record for a (zone, category) pair.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn delete_policy_record(&self, zone_id: &ZoneId, category: &str) -> Result<()>;

    /// List all policy records of a zone.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_records_by_zone(&self, zone_id: &ZoneId) -> Result<Vec<IngressPolicyRecord>>;

    /// List all policy records in a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_records_by_cluster(&self, cluster: &ClusterKey) -> Result<Vec<IngressPolicyRecord>>;

    // =========================================================================
    // Package Operations
    // =========================================================================

    /// Insert or update a package record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_package(&self, package: &Package) -> Result<()>;

    /// Get a package by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_package(&self, package_id: &PackageId) -> Result<Option<Package>>;

    /// Insert or update a package API record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_package_api(&self, api: &PackageApi) -> Result<()>;

    /// Get a package API by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_package_api(&self, api_id: &PackageApiId) -> Result<Option<PackageApi>>;

    // =========================================================================
    // Sequencing and Transaction Control
    // =========================================================================

    /// Allocate the next record sequence number within this session.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be read.
    fn next_record_seq(&self) -> Result<u64>;

    /// Atomically commit every staged write.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch write fails; nothing is applied in that
    /// case.
    fn commit(self) -> Result<()>
    where
        Self: Sized;

    /// Discard every staged write.
    fn rollback(self)
    where
        Self: Sized;
}
