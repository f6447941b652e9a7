//! Key encoding utilities for `RocksDB`.
//!
//! Identifiers are key-safe strings (validated to exclude NUL), joined with a
//! single 0x00 separator so every index supports efficient prefix scans.

use zonegate_core::{ClusterKey, PackageId, ZoneId};

/// Separator between key components.
pub const SEP: u8 = 0x00;

fn join(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len()).sum::<usize>() + parts.len();
    let mut key = Vec::with_capacity(len);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(part);
    }
    key
}

/// Encode a zone key (just the zone ID bytes).
#[must_use]
pub fn zone_key(zone_id: &ZoneId) -> Vec<u8> {
    zone_id.as_bytes().to_vec()
}

/// Encode a cluster-zone index key: `cluster || 0x00 || zone_id`.
#[must_use]
pub fn cluster_zone_key(cluster: &ClusterKey, zone_id: &ZoneId) -> Vec<u8> {
    join(&[cluster.as_bytes(), zone_id.as_bytes()])
}

/// Encode a cluster prefix for scanning all zones in a cluster.
#[must_use]
pub fn cluster_prefix(cluster: &ClusterKey) -> Vec<u8> {
    let mut key = cluster.as_bytes().to_vec();
    key.push(SEP);
    key
}

/// Encode a package-zone index key: `package_id || 0x00 || zone_id`.
#[must_use]
pub fn package_zone_key(package_id: &PackageId, zone_id: &ZoneId) -> Vec<u8> {
    join(&[package_id.as_bytes(), zone_id.as_bytes()])
}

/// Encode a package prefix for scanning all zones of a package.
#[must_use]
pub fn package_prefix(package_id: &PackageId) -> Vec<u8> {
    let mut key = package_id.as_bytes().to_vec();
    key.push(SEP);
    key
}

/// Encode a policy record key: `zone_id || 0x00 || category`.
#[must_use]
pub fn record_key(zone_id: &ZoneId, category: &str) -> Vec<u8> {
    join(&[zone_id.as_bytes(), category.as_bytes()])
}

/// Encode a zone prefix for scanning all policy records of a zone.
#[must_use]
pub fn record_zone_prefix(zone_id: &ZoneId) -> Vec<u8> {
    let mut key = zone_id.as_bytes().to_vec();
    key.push(SEP);
    key
}

/// Encode a cluster-record index key:
/// `cluster || 0x00 || zone_id || 0x00 || category`.
#[must_use]
pub fn cluster_record_key(cluster: &ClusterKey, zone_id: &ZoneId, category: &str) -> Vec<u8> {
    join(&[cluster.as_bytes(), zone_id.as_bytes(), category.as_bytes()])
}

/// Extract the trailing component after the last separator of an index key.
///
/// Returns `None` if the key contains no separator or the suffix is not
/// valid UTF-8.
#[must_use]
pub fn suffix_after_last_sep(key: &[u8]) -> Option<&str> {
    let pos = key.iter().rposition(|&b| b == SEP)?;
    std::str::from_utf8(&key[pos + 1..]).ok()
}
