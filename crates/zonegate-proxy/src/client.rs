//! HTTP transport for the Kong admin API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use zonegate_core::ClusterKey;

use crate::error::{ProxyError, Result};
use crate::plugin::DomainPolicyConfig;

/// Adapter over the proxy admin API.
///
/// Implementations must be idempotent: publishing the same plugin id twice
/// with the same payload leaves the proxy in the same state, and removing
/// an absent plugin succeeds.
#[async_trait]
pub trait ProxyAdapter: Send + Sync {
    /// Create or replace the plugin instance with the given id.
    async fn create_or_update_plugin_by_id(
        &self,
        cluster: &ClusterKey,
        plugin_id: &str,
        config: &DomainPolicyConfig,
    ) -> Result<()>;

    /// Remove the plugin instance. Absent plugins are not an error.
    async fn remove_plugin(&self, cluster: &ClusterKey, plugin_id: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct PluginUpsertBody<'a> {
    name: &'static str,
    config: &'a DomainPolicyConfig,
}

/// `ProxyAdapter` speaking to a real Kong admin endpoint per cluster.
pub struct HttpProxyAdapter {
    client: reqwest::Client,
    admin_url: String,
}

impl HttpProxyAdapter {
    /// Create an adapter for one admin endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(admin_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            admin_url: admin_url.into(),
        })
    }

    fn plugin_url(&self, plugin_id: &str) -> String {
        format!("{}/plugins/{plugin_id}", self.admin_url)
    }

    async fn reject(response: reqwest::Response) -> ProxyError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body = body.chars().take(512).collect();
        ProxyError::AdminRejected { status, body }
    }
}

#[async_trait]
impl ProxyAdapter for HttpProxyAdapter {
    async fn create_or_update_plugin_by_id(
        &self,
        cluster: &ClusterKey,
        plugin_id: &str,
        config: &DomainPolicyConfig,
    ) -> Result<()> {
        let body = PluginUpsertBody {
            name: "domain-policy",
            config,
        };

        let response = self
            .client
            .put(self.plugin_url(plugin_id))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        tracing::info!(
            cluster = %cluster,
            plugin_id,
            rules = config.len(),
            "Published domain-policy plugin"
        );
        Ok(())
    }

    async fn remove_plugin(&self, cluster: &ClusterKey, plugin_id: &str) -> Result<()> {
        let response = self.client.delete(self.plugin_url(plugin_id)).send().await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            return Err(Self::reject(response).await);
        }

        tracing::info!(cluster = %cluster, plugin_id, "Removed domain-policy plugin");
        Ok(())
    }
}

/// In-memory recording adapter for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use parking_lot::Mutex;

    use super::{async_trait, ClusterKey, DomainPolicyConfig, ProxyAdapter, ProxyError, Result};

    /// One recorded admin-API call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProxyCall {
        /// `create_or_update_plugin_by_id` with its full payload.
        Upsert {
            /// Target cluster.
            cluster: ClusterKey,
            /// Plugin id.
            plugin_id: String,
            /// Published table.
            config: DomainPolicyConfig,
        },
        /// `remove_plugin`.
        Remove {
            /// Target cluster.
            cluster: ClusterKey,
            /// Plugin id.
            plugin_id: String,
        },
    }

    /// `ProxyAdapter` that records calls and optionally fails.
    #[derive(Default)]
    pub struct RecordingProxy {
        calls: Mutex<Vec<ProxyCall>>,
        fail_upserts: Mutex<bool>,
    }

    impl RecordingProxy {
        /// Create an adapter that accepts everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent upserts fail with a transport-style error.
        pub fn fail_upserts(&self, fail: bool) {
            *self.fail_upserts.lock() = fail;
        }

        /// All calls recorded so far, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<ProxyCall> {
            self.calls.lock().clone()
        }

        /// The most recently published table, if any.
        #[must_use]
        pub fn last_published(&self) -> Option<DomainPolicyConfig> {
            self.calls.lock().iter().rev().find_map(|call| match call {
                ProxyCall::Upsert { config, .. } => Some(config.clone()),
                ProxyCall::Remove { .. } => None,
            })
        }
    }

    #[async_trait]
    impl ProxyAdapter for RecordingProxy {
        async fn create_or_update_plugin_by_id(
            &self,
            cluster: &ClusterKey,
            plugin_id: &str,
            config: &DomainPolicyConfig,
        ) -> Result<()> {
            if *self.fail_upserts.lock() {
                return Err(ProxyError::Protocol("injected upsert failure".to_string()));
            }
            self.calls.lock().push(ProxyCall::Upsert {
                cluster: cluster.clone(),
                plugin_id: plugin_id.to_string(),
                config: config.clone(),
            });
            Ok(())
        }

        async fn remove_plugin(&self, cluster: &ClusterKey, plugin_id: &str) -> Result<()> {
            self.calls.lock().push(ProxyCall::Remove {
                cluster: cluster.clone(),
                plugin_id: plugin_id.to_string(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn sample_config() -> DomainPolicyConfig {
        let mut config = DomainPolicyConfig::default();
        config.push_rule(
            "shop.example.com/".to_string(),
            "z1".to_string(),
            "request-id".to_string(),
            String::new(),
            true,
            "shop".to_string(),
            "p1".to_string(),
            "prod".to_string(),
        );
        config
    }

    #[tokio::test]
    async fn upsert_puts_plugin_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/plugins/domain-policy-c1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpProxyAdapter::new(server.uri()).unwrap();
        let cluster = ClusterKey::new("c1").unwrap();
        adapter
            .create_or_update_plugin_by_id(&cluster, "domain-policy-c1", &sample_config())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn admin_rejection_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad regex"))
            .mount(&server)
            .await;

        let adapter = HttpProxyAdapter::new(server.uri()).unwrap();
        let cluster = ClusterKey::new("c1").unwrap();
        let err = adapter
            .create_or_update_plugin_by_id(&cluster, "domain-policy-c1", &sample_config())
            .await
            .unwrap_err();

        match err {
            ProxyError::AdminRejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad regex");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn remove_tolerates_missing_plugin() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/plugins/domain-policy-c1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = HttpProxyAdapter::new(server.uri()).unwrap();
        let cluster = ClusterKey::new("c1").unwrap();
        adapter
            .remove_plugin(&cluster, "domain-policy-c1")
            .await
            .unwrap();
    }
}
