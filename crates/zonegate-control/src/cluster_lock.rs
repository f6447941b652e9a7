//! Per-cluster mutual exclusion.
//!
//! Every mutating operation against one cluster runs under that cluster's
//! lock, which totally orders mesh and proxy calls per cluster. The lock
//! table is a fixed array of buckets; a cluster maps to its bucket by a
//! stable hash, so distinct clusters may share a bucket but one cluster
//! always maps to the same one.
//!
//! The table is owned by the service that uses it. There is no process-wide
//! static; tests construct their own tables.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use zonegate_core::ClusterKey;

const BUCKETS: usize = 512;

/// Fixed-size table of per-cluster locks.
pub struct ClusterLocks {
    buckets: Vec<Arc<Mutex<()>>>,
}

impl Default for ClusterLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterLocks {
    /// Create the lock table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    /// Acquire the lock for a cluster, waiting as long as it takes.
    ///
    /// The returned guard releases the lock when dropped, on every exit
    /// path including unwinds.
    pub async fn lock(&self, cluster: &ClusterKey) -> OwnedMutexGuard<()> {
        #[allow(clippy::cast_possible_truncation)]
        let index = (cluster.stable_hash() % BUCKETS as u64) as usize;
        Arc::clone(&self.buckets[index]).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_cluster_is_mutually_exclusive() {
        let locks = Arc::new(ClusterLocks::new());
        let cluster = ClusterKey::new("prod-east").unwrap();

        let guard = locks.lock(&cluster).await;

        let locks2 = Arc::clone(&locks);
        let cluster2 = cluster.clone();
        let contender = tokio::spawn(async move {
            let _guard = locks2.lock(&cluster2).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn lock_is_released_on_unwind() {
        let locks = Arc::new(ClusterLocks::new());
        let cluster = ClusterKey::new("prod-east").unwrap();

        let locks2 = Arc::clone(&locks);
        let cluster2 = cluster.clone();
        let panicker = tokio::spawn(async move {
            let _guard = locks2.lock(&cluster2).await;
            panic!("deliberate");
        });
        assert!(panicker.await.is_err());

        // Must not deadlock.
        let _guard = locks.lock(&cluster).await;
    }

    #[tokio::test]
    async fn lock_can_be_reacquired_after_release() {
        let locks = ClusterLocks::new();
        let cluster = ClusterKey::new("prod-east").unwrap();

        let guard = locks.lock(&cluster).await;
        drop(guard);
        let _guard = locks.lock(&cluster).await;
    }
}
