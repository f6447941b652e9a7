//! Rollback and reconciliation.
//!
//! When an apply fails after touching infrastructure, its session is rolled
//! back and the affected zones are reconciled: each reconciliation task
//! takes the zone's cluster lock, opens a fresh session over the last
//! committed state, and redeploys it to the mesh and the proxy. Taking the
//! lock keeps reconciliation inside the per-cluster total order, so a late
//! task can never overwrite a newer apply. Reconciliation never propagates
//! errors upward; failures and panics are logged and the original apply
//! error is what the caller sees.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use zonegate_core::{global_regions, zone_regions};
use zonegate_mesh::MeshRouter;
use zonegate_proxy::ProxyAdapter;
use zonegate_store::{Store, StoreSession, Zone};

use crate::aggregate::IngressChangeAggregator;
use crate::cluster_lock::ClusterLocks;
use crate::domain_policy::DomainPolicyPublisher;
use crate::error::Result;

const DEFAULT_CONCURRENCY: usize = 8;

/// Fans out reconciliation after a failed apply.
pub struct RollbackCoordinator<S: Store> {
    store: Arc<S>,
    mesh: Arc<dyn MeshRouter>,
    proxy: Arc<dyn ProxyAdapter>,
    locks: Arc<ClusterLocks>,
    max_concurrency: usize,
}

impl<S: Store> RollbackCoordinator<S> {
    /// Create a coordinator with the default reconciliation concurrency.
    ///
    /// `locks` must be the same table the applying service uses, so
    /// reconciliation serializes with regular applies.
    pub fn new(
        store: Arc<S>,
        mesh: Arc<dyn MeshRouter>,
        proxy: Arc<dyn ProxyAdapter>,
        locks: Arc<ClusterLocks>,
    ) -> Self {
        Self {
            store,
            mesh,
            proxy,
            locks,
            max_concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Redeploy one zone from the session's (committed) view: annotation
    /// merge, controller merge, routing-priority table.
    pub(crate) async fn redeploy_zone(
        session: &S::Session,
        mesh: &dyn MeshRouter,
        proxy: &dyn ProxyAdapter,
        zone: &Zone,
    ) -> Result<()> {
        let annotation = IngressChangeAggregator::get_changes(
            session,
            &zone.cluster,
            &zone_regions(),
            Some(&zone.id),
        )?;
        mesh.update_ingress_annotation(
            &zone.cluster,
            &zone.namespace,
            &zone.name,
            &annotation.annotation_state(),
        )
        .await?;

        let controller =
            IngressChangeAggregator::get_changes(session, &zone.cluster, &global_regions(), None)?;
        mesh.update_ingress_controller(&zone.cluster, &controller.controller_state())
            .await?;

        DomainPolicyPublisher::publish(session, proxy, &zone.cluster).await?;
        Ok(())
    }

    /// Reconcile many zones concurrently and wait for all of them.
    ///
    /// Used by the bulk apply path, which must not report its original
    /// error until every zone has been pushed back to committed state.
    /// Every task takes its zone's cluster lock, so the caller must have
    /// released its own guard before awaiting this.
    pub async fn reconcile_zones(&self, zones: &[Zone]) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for zone in zones.iter().cloned() {
            let store = Arc::clone(&self.store);
            let mesh = Arc::clone(&self.mesh);
            let proxy = Arc::clone(&self.proxy);
            let locks = Arc::clone(&self.locks);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let _guard = locks.lock(&zone.cluster).await;
                let session = store.session();
                if let Err(e) =
                    Self::redeploy_zone(&session, mesh.as_ref(), proxy.as_ref(), &zone).await
                {
                    tracing::error!(zone = %zone.id, error = %e, "Zone reconciliation failed");
                }
                session.rollback();
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Reconciliation task panicked");
            }
        }
    }

    /// Reconcile one zone in the background.
    ///
    /// The single-zone failure path does not block the caller; the task
    /// runs to completion on its own, with panics caught and logged.
    pub fn reconcile_zone_detached(&self, zone: Zone) {
        let store = Arc::clone(&self.store);
        let mesh = Arc::clone(&self.mesh);
        let proxy = Arc::clone(&self.proxy);
        let locks = Arc::clone(&self.locks);

        tokio::spawn(async move {
            let zone_id = zone.id.clone();
            let work = async move {
                let _guard = locks.lock(&zone.cluster).await;
                let session = store.session();
                if let Err(e) =
                    Self::redeploy_zone(&session, mesh.as_ref(), proxy.as_ref(), &zone).await
                {
                    tracing::error!(zone = %zone.id, error = %e, "Zone reconciliation failed");
                }
                session.rollback();
            };
            if std::panic::AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .is_err()
            {
                tracing::error!(zone = %zone_id, "Zone reconciliation panicked");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;
    use zonegate_core::{ClusterKey, ZoneId};
    use zonegate_mesh::mock::{MeshCall, RecordingMesh};
    use zonegate_proxy::mock::RecordingProxy;
    use zonegate_store::{RocksStore, StoreSession, ZoneType};

    use super::*;

    fn zone(id: &str) -> Zone {
        Zone {
            id: ZoneId::new(id).unwrap(),
            name: id.to_string(),
            namespace: "gw".to_string(),
            cluster: ClusterKey::new("c1").unwrap(),
            project_id: "p1".to_string(),
            env: "prod".to_string(),
            zone_type: ZoneType::Unity,
            kong_policies: None,
            route: None,
            package_id: None,
            package_api_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reconcile_waits_for_every_zone() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let mesh = Arc::new(RecordingMesh::new());
        let proxy = Arc::new(RecordingProxy::new());

        let zones: Vec<Zone> = (0..5).map(|i| zone(&format!("z{i}"))).collect();
        for z in &zones {
            let session = store.session();
            session.put_zone(z).unwrap();
            session.commit().unwrap();
        }

        let coordinator = RollbackCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&mesh) as Arc<dyn MeshRouter>,
            Arc::clone(&proxy) as Arc<dyn ProxyAdapter>,
            Arc::new(ClusterLocks::new()),
        );
        coordinator.reconcile_zones(&zones).await;

        // Each zone gets an annotation deploy and a controller deploy.
        let calls = mesh.calls();
        let annotation_calls = calls
            .iter()
            .filter(|c| matches!(c, MeshCall::UpdateIngressAnnotation { .. }))
            .count();
        assert_eq!(annotation_calls, 5);
        assert_eq!(proxy.calls().len(), 5);
    }

    #[tokio::test]
    async fn reconcile_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let mesh = Arc::new(RecordingMesh::new());
        let proxy = Arc::new(RecordingProxy::new());
        mesh.fail_annotation_updates(true);

        let coordinator = RollbackCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&mesh) as Arc<dyn MeshRouter>,
            Arc::clone(&proxy) as Arc<dyn ProxyAdapter>,
            Arc::new(ClusterLocks::new()),
        );

        // Completes despite every annotation update failing.
        coordinator.reconcile_zones(&[zone("z1"), zone("z2")]).await;
        assert!(proxy.calls().is_empty());
    }

    #[tokio::test]
    async fn detached_reconciliation_waits_for_the_cluster_lock() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let mesh = Arc::new(RecordingMesh::new());
        let proxy = Arc::new(RecordingProxy::new());
        let locks = Arc::new(ClusterLocks::new());

        let z = zone("z1");
        let session = store.session();
        session.put_zone(&z).unwrap();
        session.commit().unwrap();

        let coordinator = RollbackCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&mesh) as Arc<dyn MeshRouter>,
            Arc::clone(&proxy) as Arc<dyn ProxyAdapter>,
            Arc::clone(&locks),
        );

        let guard = locks.lock(&z.cluster).await;
        coordinator.reconcile_zone_detached(z.clone());

        // Blocked behind the held lock: nothing deployed yet.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(mesh.calls().is_empty());

        drop(guard);
        let mut redeployed = false;
        for _ in 0..100 {
            if !mesh.calls().is_empty() {
                redeployed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(redeployed);
    }
}
