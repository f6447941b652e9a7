//! Kubernetes mesh router implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec as K8sIngressSpec, ServiceBackendPort,
};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use zonegate_core::ClusterKey;

use crate::error::{MeshError, Result};
use crate::types::{ControllerState, IngressSpec, ZoneAnnotationState};

const ANNOTATION_PREFIX: &str = "nginx.ingress.kubernetes.io/";
const LOCATION_SNIPPET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/configuration-snippet";

const CONFIGMAP_MAIN_SNIPPET: &str = "main-snippet";
const CONFIGMAP_HTTP_SNIPPET: &str = "http-snippet";
const CONFIGMAP_SERVER_SNIPPET: &str = "server-snippet";

/// The `MeshRouter` trait defines the deploy interface to the mesh.
///
/// Implementations must be idempotent: deploying the same state twice
/// leaves the cluster unchanged, and deleting an absent ingress succeeds.
#[async_trait]
pub trait MeshRouter: Send + Sync {
    /// Deploy cluster-scoped controller state.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller configmap cannot be patched.
    async fn update_ingress_controller(
        &self,
        cluster: &ClusterKey,
        state: &ControllerState,
    ) -> Result<()>;

    /// Deploy zone-scoped annotation state onto the zone's ingress.
    ///
    /// # Errors
    ///
    /// Returns an error if the ingress cannot be read or updated.
    async fn update_ingress_annotation(
        &self,
        cluster: &ClusterKey,
        namespace: &str,
        zone_name: &str,
        state: &ZoneAnnotationState,
    ) -> Result<()>;

    /// Create or replace a zone's ingress object.
    ///
    /// # Errors
    ///
    /// Returns an error if the ingress cannot be written.
    async fn create_or_update_ingress(&self, cluster: &ClusterKey, spec: &IngressSpec)
        -> Result<()>;

    /// Delete a zone's ingress object. Absent ingresses are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails for any reason other than 404.
    async fn delete_ingress(&self, cluster: &ClusterKey, namespace: &str, name: &str)
        -> Result<()>;
}

/// `MeshRouter` backed by a real Kubernetes cluster.
///
/// One router serves one cluster; every call checks the cluster key it was
/// configured with so that a misrouted deploy fails loudly instead of
/// landing in the wrong cluster.
pub struct KubeMeshRouter {
    client: Client,
    cluster: ClusterKey,
    controller_namespace: String,
    controller_configmap: String,
}

impl KubeMeshRouter {
    /// Connect using in-cluster config or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn new(
        cluster: ClusterKey,
        controller_namespace: impl Into<String>,
        controller_configmap: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(
            client,
            cluster,
            controller_namespace,
            controller_configmap,
        ))
    }

    /// Create a router with a pre-configured client. Useful for testing.
    #[must_use]
    pub fn with_client(
        client: Client,
        cluster: ClusterKey,
        controller_namespace: impl Into<String>,
        controller_configmap: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cluster,
            controller_namespace: controller_namespace.into(),
            controller_configmap: controller_configmap.into(),
        }
    }

    fn check_cluster(&self, cluster: &ClusterKey) -> Result<()> {
        if cluster == &self.cluster {
            Ok(())
        } else {
            Err(MeshError::UnknownCluster(cluster.to_string()))
        }
    }

    fn ingress_api(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Empty values become JSON null so a merge patch removes the key.
    fn patch_value(value: &str) -> Value {
        if value.is_empty() {
            Value::Null
        } else {
            Value::String(value.to_string())
        }
    }

    fn build_ingress(spec: &IngressSpec) -> Ingress {
        Ingress {
            metadata: kube::api::ObjectMeta {
                name: Some(spec.name.clone()),
                namespace: Some(spec.namespace.clone()),
                ..Default::default()
            },
            spec: Some(K8sIngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(spec.host.clone()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some(spec.path.clone()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: spec.service_name.clone(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(spec.service_port),
                                        name: None,
                                    }),
                                }),
                                resource: None,
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }
}

#[async_trait]
impl MeshRouter for KubeMeshRouter {
    async fn update_ingress_controller(
        &self,
        cluster: &ClusterKey,
        state: &ControllerState,
    ) -> Result<()> {
        self.check_cluster(cluster)?;
        if state.is_noop() {
            debug!(cluster = %cluster, "No controller changes to deploy");
            return Ok(());
        }

        let mut data = serde_json::Map::new();
        if let Some(options) = &state.configmap_options {
            for (key, value) in options {
                data.insert(key.clone(), Self::patch_value(value));
            }
        }
        if let Some(snippet) = &state.main_snippet {
            data.insert(CONFIGMAP_MAIN_SNIPPET.to_string(), Self::patch_value(snippet));
        }
        if let Some(snippet) = &state.http_snippet {
            data.insert(CONFIGMAP_HTTP_SNIPPET.to_string(), Self::patch_value(snippet));
        }
        if let Some(snippet) = &state.server_snippet {
            data.insert(
                CONFIGMAP_SERVER_SNIPPET.to_string(),
                Self::patch_value(snippet),
            );
        }

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.controller_namespace);
        let patch = json!({ "data": Value::Object(data) });
        api.patch(
            &self.controller_configmap,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;

        info!(
            cluster = %cluster,
            configmap = %self.controller_configmap,
            "Deployed ingress controller state"
        );
        Ok(())
    }

    async fn update_ingress_annotation(
        &self,
        cluster: &ClusterKey,
        namespace: &str,
        zone_name: &str,
        state: &ZoneAnnotationState,
    ) -> Result<()> {
        self.check_cluster(cluster)?;
        if state.is_noop() {
            debug!(cluster = %cluster, zone = zone_name, "No annotation changes to deploy");
            return Ok(());
        }

        let api = self.ingress_api(namespace);
        let mut ingress = api.get(zone_name).await?;

        let existing = ingress.metadata.annotations.take().unwrap_or_default();
        let mut merged: BTreeMap<String, String> = if state.annotations.is_some() {
            // A present annotation map replaces the managed prefix wholesale.
            existing
                .into_iter()
                .filter(|(key, _)| !key.starts_with(ANNOTATION_PREFIX))
                .collect()
        } else {
            existing
        };

        if let Some(annotations) = &state.annotations {
            merged.extend(annotations.clone());
        }
        if let Some(snippet) = &state.location_snippet {
            if snippet.is_empty() {
                merged.remove(LOCATION_SNIPPET_ANNOTATION);
            } else {
                merged.insert(LOCATION_SNIPPET_ANNOTATION.to_string(), snippet.clone());
            }
        }

        ingress.metadata.annotations = Some(merged);
        api.replace(zone_name, &PostParams::default(), &ingress)
            .await?;

        info!(cluster = %cluster, zone = zone_name, "Deployed zone ingress annotations");
        Ok(())
    }

    async fn create_or_update_ingress(
        &self,
        cluster: &ClusterKey,
        spec: &IngressSpec,
    ) -> Result<()> {
        self.check_cluster(cluster)?;

        let api = self.ingress_api(&spec.namespace);
        let ingress = Self::build_ingress(spec);

        match api.get(&spec.name).await {
            Ok(_) => {
                api.replace(&spec.name, &PostParams::default(), &ingress)
                    .await?;
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                api.create(&PostParams::default(), &ingress).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(cluster = %cluster, ingress = %spec.name, host = %spec.host, "Ensured zone ingress");
        Ok(())
    }

    async fn delete_ingress(
        &self,
        cluster: &ClusterKey,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        self.check_cluster(cluster)?;

        let api = self.ingress_api(namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(cluster = %cluster, ingress = name, "Deleted zone ingress");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(cluster = %cluster, ingress = name, "Ingress already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory recording router for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use parking_lot::Mutex;

    use super::{
        async_trait, ClusterKey, ControllerState, IngressSpec, MeshError, MeshRouter, Result,
        ZoneAnnotationState,
    };

    /// One recorded mesh call, with its full payload.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MeshCall {
        /// `update_ingress_controller`.
        UpdateIngressController {
            /// Target cluster.
            cluster: ClusterKey,
            /// Deployed controller state.
            state: ControllerState,
        },
        /// `update_ingress_annotation`.
        UpdateIngressAnnotation {
            /// Target cluster.
            cluster: ClusterKey,
            /// Ingress namespace.
            namespace: String,
            /// Zone name.
            zone_name: String,
            /// Deployed annotation state.
            state: ZoneAnnotationState,
        },
        /// `create_or_update_ingress`.
        CreateOrUpdateIngress {
            /// Target cluster.
            cluster: ClusterKey,
            /// Ingress spec.
            spec: IngressSpec,
        },
        /// `delete_ingress`.
        DeleteIngress {
            /// Target cluster.
            cluster: ClusterKey,
            /// Ingress namespace.
            namespace: String,
            /// Ingress name.
            name: String,
        },
    }

    /// `MeshRouter` that records calls and optionally fails.
    #[derive(Default)]
    pub struct RecordingMesh {
        calls: Mutex<Vec<MeshCall>>,
        fail_controller_updates: Mutex<bool>,
        fail_annotation_updates: Mutex<bool>,
    }

    impl RecordingMesh {
        /// Create a router that accepts everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent controller updates fail.
        pub fn fail_controller_updates(&self, fail: bool) {
            *self.fail_controller_updates.lock() = fail;
        }

        /// Make subsequent annotation updates fail.
        pub fn fail_annotation_updates(&self, fail: bool) {
            *self.fail_annotation_updates.lock() = fail;
        }

        /// All calls recorded so far, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<MeshCall> {
            self.calls.lock().clone()
        }

        /// Drop all recorded calls.
        pub fn clear(&self) {
            self.calls.lock().clear();
        }

        fn injected(cluster: &ClusterKey) -> MeshError {
            MeshError::UnknownCluster(format!("injected failure for {cluster}"))
        }
    }

    #[async_trait]
    impl MeshRouter for RecordingMesh {
        async fn update_ingress_controller(
            &self,
            cluster: &ClusterKey,
            state: &ControllerState,
        ) -> Result<()> {
            if *self.fail_controller_updates.lock() {
                return Err(Self::injected(cluster));
            }
            self.calls.lock().push(MeshCall::UpdateIngressController {
                cluster: cluster.clone(),
                state: state.clone(),
            });
            Ok(())
        }

        async fn update_ingress_annotation(
            &self,
            cluster: &ClusterKey,
            namespace: &str,
            zone_name: &str,
            state: &ZoneAnnotationState,
        ) -> Result<()> {
            if *self.fail_annotation_updates.lock() {
                return Err(Self::injected(cluster));
            }
            self.calls.lock().push(MeshCall::UpdateIngressAnnotation {
                cluster: cluster.clone(),
                namespace: namespace.to_string(),
                zone_name: zone_name.to_string(),
                state: state.clone(),
            });
            Ok(())
        }

        async fn create_or_update_ingress(
            &self,
            cluster: &ClusterKey,
            spec: &IngressSpec,
        ) -> Result<()> {
            self.calls.lock().push(MeshCall::CreateOrUpdateIngress {
                cluster: cluster.clone(),
                spec: spec.clone(),
            });
            Ok(())
        }

        async fn delete_ingress(
            &self,
            cluster: &ClusterKey,
            namespace: &str,
            name: &str,
        ) -> Result<()> {
            self.calls.lock().push(MeshCall::DeleteIngress {
                cluster: cluster.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
            Ok(())
        }
    }
}
