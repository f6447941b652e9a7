//! Database schema definitions and column families.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary zone records, keyed by `zone_id`.
    pub const ZONES: &str = "zones";

    /// Index: zones by cluster, keyed by `cluster || 0x00 || zone_id`.
    pub const ZONES_BY_CLUSTER: &str = "zones_by_cluster";

    /// Index: zones by package, keyed by `package_id || 0x00 || zone_id`.
    pub const ZONES_BY_PACKAGE: &str = "zones_by_package";

    /// Ingress policy records, keyed by `zone_id || 0x00 || category`.
    pub const POLICY_RECORDS: &str = "policy_records";

    /// Index: policy records by cluster, keyed by
    /// `cluster || 0x00 || zone_id || 0x00 || category`.
    pub const RECORDS_BY_CLUSTER: &str = "records_by_cluster";

    /// Package records, keyed by `package_id`.
    pub const PACKAGES: &str = "packages";

    /// Package API records, keyed by `package_api_id`.
    pub const PACKAGE_APIS: &str = "package_apis";

    /// Metadata (sequence counters), fixed keys.
    pub const META: &str = "meta";
}

/// Key of the record-sequence counter in the `meta` column family.
pub const RECORD_SEQ_KEY: &[u8] = b"record_seq";

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ZONES,
        cf::ZONES_BY_CLUSTER,
        cf::ZONES_BY_PACKAGE,
        cf::POLICY_RECORDS,
        cf::RECORDS_BY_CLUSTER,
        cf::PACKAGES,
        cf::PACKAGE_APIS,
        cf::META,
    ]
}
