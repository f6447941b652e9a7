//! The policy apply pipeline.
//!
//! `PolicyService` drives every mutation of zone policy state through one
//! ordered pipeline: parse, persist into a session, deploy to the mesh,
//! publish to the proxy, re-apply the built-in baseline, commit. All
//! deploying operations for a cluster run under that cluster's lock, so
//! mesh and proxy observe a total order of changes per cluster.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use zonegate_core::{global_regions, zone_regions, ClusterKey, PackageId, ZoneId};
use zonegate_mesh::{IngressSpec, MeshRouter};
use zonegate_policy::{ParseContext, PolicyRegistry, BUILTIN_CATEGORY};
use zonegate_proxy::ProxyAdapter;
use zonegate_store::{IngressPolicyRecord, Store, StoreSession, Zone, ZoneType};

use crate::aggregate::{IngressChangeAggregator, IngressChanges};
use crate::cluster_lock::ClusterLocks;
use crate::domain_policy::{routing_score, DomainPolicyEntry, DomainPolicyPublisher};
use crate::error::{ControlError, Result};
use crate::rollback::RollbackCoordinator;
use crate::types::{ApplyResult, ApplyStage};

/// Default backend port for zone ingress objects.
const ZONE_SERVICE_PORT: i32 = 80;

/// A session the service either owns or borrows from the caller.
///
/// Owned sessions are committed (or rolled back) by the service; borrowed
/// sessions belong to an enclosing operation which controls their fate.
enum SessionHolder<'a, T: StoreSession> {
    Owned(T),
    Borrowed(&'a T),
}

impl<T: StoreSession> SessionHolder<'_, T> {
    fn get(&self) -> &T {
        match self {
            Self::Owned(s) => s,
            Self::Borrowed(s) => s,
        }
    }

    const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    fn commit(self) -> Result<bool> {
        match self {
            Self::Owned(s) => {
                s.commit()?;
                Ok(true)
            }
            Self::Borrowed(_) => Ok(false),
        }
    }

    fn rollback(self) {
        if let Self::Owned(s) = self {
            s.rollback();
        }
    }
}

/// The control-plane service coordinating stores, engines, and adapters.
pub struct PolicyService<S: Store> {
    store: Arc<S>,
    registry: Arc<PolicyRegistry>,
    proxy: Arc<dyn ProxyAdapter>,
    mesh: Arc<dyn MeshRouter>,
    locks: Arc<ClusterLocks>,
    rollback: RollbackCoordinator<S>,
}

impl<S: Store> PolicyService<S> {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        registry: Arc<PolicyRegistry>,
        proxy: Arc<dyn ProxyAdapter>,
        mesh: Arc<dyn MeshRouter>,
    ) -> Self {
        // Reconciliation shares the lock table, so its deploys stay inside
        // the per-cluster total order.
        let locks = Arc::new(ClusterLocks::new());
        let rollback = RollbackCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&mesh),
            Arc::clone(&proxy),
            Arc::clone(&locks),
        );
        Self {
            store,
            registry,
            proxy,
            mesh,
            locks,
            rollback,
        }
    }

    /// Apply a policy config to one zone.
    ///
    /// `config = None` recomputes the category's default. A caller-provided
    /// `session` joins that caller's transaction: the service stages into
    /// it without committing, and with `deploy = false` the operation is a
    /// pure database batch that skips the cluster lock entirely.
    ///
    /// # Errors
    ///
    /// Returns a validation/conflict/not-found error without touching
    /// infrastructure, or an infrastructure error after rolling back the
    /// owned session and scheduling reconciliation of the zone.
    pub async fn set_zone_policy_config(
        &self,
        zone_id: &ZoneId,
        category: &str,
        config: Option<&[u8]>,
        session: Option<&S::Session>,
        deploy: bool,
    ) -> Result<ApplyResult> {
        let holder = match session {
            Some(s) => SessionHolder::Borrowed(s),
            None => SessionHolder::Owned(self.store.session()),
        };

        let zone = holder
            .get()
            .get_zone(zone_id)?
            .ok_or_else(|| ControlError::ZoneNotFound(zone_id.clone()))?;

        // Deploying callers serialize per cluster; DB-only batches don't.
        let guard = if deploy {
            Some(self.locks.lock(&zone.cluster).await)
        } else {
            None
        };

        // The first read only routed us to a lock bucket; a concurrent
        // delete may have won the race, so re-read under the lock.
        let zone = if guard.is_some() {
            holder
                .get()
                .get_zone(zone_id)?
                .ok_or_else(|| ControlError::ZoneNotFound(zone_id.clone()))?
        } else {
            zone
        };

        let outcome = self
            .apply_with_baseline(holder.get(), &zone, category, config, deploy)
            .await;

        match outcome {
            Ok((dto, stage)) => {
                let was_owned = holder.is_owned();
                let committed = match holder.commit() {
                    Ok(committed) => committed,
                    Err(e) => {
                        // Mesh and proxy were already touched; push them
                        // back to the last committed state.
                        if deploy && was_owned {
                            self.rollback.reconcile_zone_detached(zone);
                        }
                        return Err(e);
                    }
                };
                let stage = if committed { ApplyStage::Committed } else { stage };
                info!(
                    zone = %zone.id,
                    category,
                    stage = ?stage,
                    "Policy apply finished"
                );
                Ok(ApplyResult {
                    dto,
                    stage,
                    user_message: None,
                })
            }
            Err(e) => {
                if e.is_infrastructure() && deploy && holder.is_owned() {
                    warn!(zone = %zone.id, category, error = %e, "Apply failed; reconciling zone");
                    holder.rollback();
                    self.rollback.reconcile_zone_detached(zone);
                } else {
                    holder.rollback();
                }
                Err(e)
            }
        }
    }

    /// Apply a category default across every zone of a package.
    ///
    /// One cluster lock and one session span all zones; either every zone's
    /// change commits or none does. On failure the session is rolled back
    /// and every zone is reconciled before the original error is reported.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered while applying.
    pub async fn set_package_default_policy_config(
        &self,
        category: &str,
        package_id: &PackageId,
        cluster: &ClusterKey,
        config: Option<&[u8]>,
    ) -> Result<Option<String>> {
        let guard = self.locks.lock(cluster).await;
        let session = self.store.session();

        if session.get_package(package_id)?.is_none() {
            session.rollback();
            return Err(ControlError::PackageNotFound(package_id.clone()));
        }
        let zones = session.list_zones_by_package(package_id)?;

        let mut failure = None;
        for zone in &zones {
            if let Err(e) = self
                .apply_with_baseline(&session, zone, category, config, true)
                .await
            {
                failure = Some((zone.id.clone(), e));
                break;
            }
        }

        if let Some((zone_id, e)) = failure {
            warn!(
                package = %package_id,
                zone = %zone_id,
                error = %e,
                "Package apply failed; rolling back and reconciling all zones"
            );
            session.rollback();
            if e.is_infrastructure() {
                // Reconciliation tasks take the cluster lock themselves.
                drop(guard);
                self.rollback.reconcile_zones(&zones).await;
            }
            return Err(e);
        }

        if let Err(e) = session.commit() {
            drop(guard);
            self.rollback.reconcile_zones(&zones).await;
            return Err(e.into());
        }
        info!(package = %package_id, category, zones = zones.len(), "Package defaults applied");
        Ok(Some(format!(
            "applied {category} defaults to {} zones",
            zones.len()
        )))
    }

    /// Redeploy a zone's committed state to the mesh and the proxy.
    ///
    /// Opens a fresh session over committed state, so any half-applied
    /// in-memory view is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the zone is unknown or a deploy fails.
    pub async fn refresh_zone_ingress(&self, zone_id: &ZoneId) -> Result<()> {
        let session = self.store.session();
        let zone = session
            .get_zone(zone_id)?
            .ok_or_else(|| ControlError::ZoneNotFound(zone_id.clone()))?;

        let _guard = self.locks.lock(&zone.cluster).await;
        // Re-read under the lock; a concurrent delete may have won the race.
        let zone = session
            .get_zone(zone_id)?
            .ok_or_else(|| ControlError::ZoneNotFound(zone_id.clone()))?;
        let result =
            RollbackCoordinator::<S>::redeploy_zone(&session, self.mesh.as_ref(), self.proxy.as_ref(), &zone)
                .await;
        session.rollback();
        result
    }

    /// Create a zone and its ingress object.
    ///
    /// # Errors
    ///
    /// Returns `ZoneExists` if the id is taken, or an infrastructure error
    /// if persistence or the ingress write fails (nothing is committed).
    pub async fn create_zone(&self, zone: Zone) -> Result<()> {
        let _guard = self.locks.lock(&zone.cluster).await;
        let session = self.store.session();

        if session.get_zone(&zone.id)?.is_some() {
            session.rollback();
            return Err(ControlError::ZoneExists(zone.id));
        }
        session.put_zone(&zone)?;

        if let Some(route) = &zone.route {
            let spec = IngressSpec {
                namespace: zone.namespace.clone(),
                name: zone.name.clone(),
                host: route.host.clone(),
                path: route.path.clone(),
                service_name: zone.name.clone(),
                service_port: ZONE_SERVICE_PORT,
            };
            if let Err(e) = self.mesh.create_or_update_ingress(&zone.cluster, &spec).await {
                session.rollback();
                return Err(e.into());
            }
        }

        session.commit()?;
        info!(zone = %zone.id, cluster = %zone.cluster, "Zone created");
        Ok(())
    }

    /// Delete a zone, its policy records, and its ingress object, and
    /// republish the routing-priority table without it.
    ///
    /// # Errors
    ///
    /// Returns `ZoneNotFound` if the zone is unknown, or an infrastructure
    /// error after rolling back and scheduling reconciliation.
    pub async fn delete_zone(&self, zone_id: &ZoneId) -> Result<()> {
        let session = self.store.session();
        let zone = session
            .get_zone(zone_id)?
            .ok_or_else(|| ControlError::ZoneNotFound(zone_id.clone()))?;

        let _guard = self.locks.lock(&zone.cluster).await;
        // Re-read under the lock; a concurrent delete may have won the race.
        let zone = session
            .get_zone(zone_id)?
            .ok_or_else(|| ControlError::ZoneNotFound(zone_id.clone()))?;

        let outcome = self.teardown_zone(&session, &zone).await;
        match outcome {
            Ok(()) => {
                session.commit()?;
                info!(zone = %zone.id, cluster = %zone.cluster, "Zone deleted");
                Ok(())
            }
            Err(e) => {
                session.rollback();
                if e.is_infrastructure() {
                    self.rollback.reconcile_zone_detached(zone);
                }
                Err(e)
            }
        }
    }

    async fn teardown_zone(&self, session: &S::Session, zone: &Zone) -> Result<()> {
        for record in session.list_records_by_zone(&zone.id)? {
            session.delete_policy_record(&zone.id, &record.category)?;
        }
        let had_policies = zone.kong_policies.is_some();
        session.delete_zone(&zone.id)?;

        self.mesh
            .delete_ingress(&zone.cluster, &zone.namespace, &zone.name)
            .await?;

        if had_policies {
            DomainPolicyPublisher::publish(session, self.proxy.as_ref(), &zone.cluster).await?;
        }
        Ok(())
    }

    /// Apply one category and, unless it *is* the baseline, re-apply the
    /// built-in baseline afterwards in the same session. On the DB-only
    /// batch path the baseline record is re-staged without deploying.
    async fn apply_with_baseline(
        &self,
        session: &S::Session,
        zone: &Zone,
        category: &str,
        config: Option<&[u8]>,
        deploy: bool,
    ) -> Result<(Value, ApplyStage)> {
        let (dto, mut stage) = self
            .apply_category(session, zone, category, config, deploy)
            .await?;

        if category != BUILTIN_CATEGORY {
            self.apply_category(session, zone, BUILTIN_CATEGORY, None, deploy)
                .await?;
            if deploy {
                stage = ApplyStage::BuiltinReapplied;
            }
        }
        Ok((dto, stage))
    }

    /// One category through the pipeline: parse, persist, deploy, publish.
    async fn apply_category(
        &self,
        session: &S::Session,
        zone: &Zone,
        category: &str,
        config: Option<&[u8]>,
        deploy: bool,
    ) -> Result<(Value, ApplyStage)> {
        let engine = self.registry.engine(category)?;
        let ctx = ParseContext {
            zone_id: zone.id.clone(),
            cluster: zone.cluster.clone(),
            project_id: zone.project_id.clone(),
            env: zone.env.clone(),
            route: zone.route.clone(),
        };

        let dto = match config {
            Some(raw) => engine.unmarshal_config(raw)?,
            None => engine.get_config(&ctx, None)?,
        };
        let parsed = engine.parse_config(&dto, &ctx)?;

        let seq = match session.get_policy_record(&zone.id, category)? {
            Some(existing) => existing.seq,
            None => session.next_record_seq()?,
        };
        let mut record = IngressPolicyRecord {
            zone_id: zone.id.clone(),
            cluster: zone.cluster.clone(),
            category: category.to_string(),
            annotations: parsed
                .ingress_annotation
                .as_ref()
                .and_then(|f| f.annotations.clone()),
            location_snippet: parsed
                .ingress_annotation
                .as_ref()
                .and_then(|f| f.location_snippet.clone()),
            configmap_options: parsed
                .ingress_controller
                .as_ref()
                .and_then(|f| f.configmap_options.clone()),
            main_snippet: parsed
                .ingress_controller
                .as_ref()
                .and_then(|f| f.main_snippet.clone()),
            http_snippet: parsed
                .ingress_controller
                .as_ref()
                .and_then(|f| f.http_snippet.clone()),
            server_snippet: parsed
                .ingress_controller
                .as_ref()
                .and_then(|f| f.server_snippet.clone()),
            regions: Default::default(),
            seq,
            updated_at: Utc::now(),
        };
        record.regions = record.computed_regions();
        session.put_policy_record(&record)?;

        if !deploy {
            return Ok((dto, ApplyStage::Persisted));
        }

        // Both merges are computed before either deploy call, so a conflict
        // in one scope cannot leave the other scope half-applied.
        let annotation_changes = if parsed.ingress_annotation.is_some() {
            Some(IngressChangeAggregator::get_changes(
                session,
                &zone.cluster,
                &zone_regions(),
                Some(&zone.id),
            )?)
        } else {
            None
        };
        let controller_changes = if parsed.ingress_controller.is_some() {
            Some(IngressChangeAggregator::get_changes(
                session,
                &zone.cluster,
                &global_regions(),
                None,
            )?)
        } else {
            None
        };

        // Clearing stale annotations must land before controller changes;
        // otherwise the cluster-wide change goes first.
        if parsed.annotation_reset {
            if let Some(changes) = &annotation_changes {
                self.deploy_annotations(zone, changes).await?;
            }
            if let Some(changes) = &controller_changes {
                self.deploy_controller(zone, changes).await?;
            }
        } else {
            if let Some(changes) = &controller_changes {
                self.deploy_controller(zone, changes).await?;
            }
            if let Some(changes) = &annotation_changes {
                self.deploy_annotations(zone, changes).await?;
            }
        }
        let mut stage = ApplyStage::MeshDeployed;

        if parsed.kong_policy_change {
            self.rewrite_kong_policies(session, zone, engine.kong_plugins(&dto))?;
            DomainPolicyPublisher::publish(session, self.proxy.as_ref(), &zone.cluster).await?;
            stage = ApplyStage::ProxyPublished;
        }

        Ok((dto, stage))
    }

    async fn deploy_annotations(&self, zone: &Zone, changes: &IngressChanges) -> Result<()> {
        self.mesh
            .update_ingress_annotation(
                &zone.cluster,
                &zone.namespace,
                &zone.name,
                &changes.annotation_state(),
            )
            .await?;
        Ok(())
    }

    async fn deploy_controller(&self, zone: &Zone, changes: &IngressChanges) -> Result<()> {
        self.mesh
            .update_ingress_controller(&zone.cluster, &changes.controller_state())
            .await?;
        Ok(())
    }

    /// Rewrite the zone's routing-priority entry from its current plugin
    /// set. Last writer under the cluster lock wins.
    ///
    /// The entry is derived from this zone alone. Package-root zones do not
    /// fold in the plugin sets of the package's API zones yet; with the two
    /// shipped engines both scopes resolve to the same built-in plugin set,
    /// so the aggregation waits for an engine that distinguishes them.
    fn rewrite_kong_policies(
        &self,
        session: &S::Session,
        zone: &Zone,
        plugins: zonegate_policy::KongPluginSet,
    ) -> Result<()> {
        let Some(route) = &zone.route else {
            warn!(zone = %zone.id, "Zone has no route; skipping routing-priority entry");
            return Ok(());
        };

        let entry = DomainPolicyEntry {
            zone_id: zone.id.clone(),
            regex: format!("{}{}", route.host, route.path),
            priority: routing_score(&route.host, &route.path),
            enabled_plugin_ids: plugins.enabled,
            disabled_plugin_ids: plugins.disabled,
            allow: true,
            // Backfilled from the owning package at publish time.
            package_name: String::new(),
            project_id: zone.project_id.clone(),
            env: zone.env.clone(),
        };

        let mut updated = session
            .get_zone(&zone.id)?
            .ok_or_else(|| ControlError::ZoneNotFound(zone.id.clone()))?;
        updated.kong_policies = Some(
            serde_json::to_string(&entry)
                .map_err(|e| ControlError::Internal(format!("serialize routing entry: {e}")))?,
        );
        updated.updated_at = Utc::now();
        session.put_zone(&updated)?;

        let scope = match zone.zone_type {
            ZoneType::PackageApi => "api",
            ZoneType::PackageRoot => "package",
            ZoneType::Unity => "zone",
        };
        tracing::debug!(zone = %zone.id, scope, "Rewrote routing-priority entry");
        Ok(())
    }
}
