//! Adapter construction with orchestrator auto-detection and a per-server cache.

use std::collections::HashMap;
use std::sync::Arc;

use common::api::{K8sCapabilities, OrchestratorType, ServerConfig};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapter::{DynOrchestratorAdapter, OrchestratorAdapter};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::kubernetes::KubernetesAdapter;
use crate::store::{ApplicationLookup, DynServerStore};
use crate::swarm::SwarmAdapter;
use crate::telemetry;

const BACKEND_KUBERNETES: &str = "kubernetes";
const BACKEND_SWARM: &str = "swarm";

pub struct OrchestratorFactory {
    store: DynServerStore,
    config: OrchestratorConfig,
    /// Keyed by [`ServerConfig::cache_key`]. Construction happens outside the
    /// lock; the last writer wins.
    cache: RwLock<HashMap<String, DynOrchestratorAdapter>>,
}

impl OrchestratorFactory {
    pub fn new(store: DynServerStore, config: OrchestratorConfig) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Adapter for `server`, from the cache unless `force_detection`.
    ///
    /// A server with a recorded orchestrator type is built directly. Otherwise
    /// the type is detected and written back to the store, along with the
    /// cluster capabilities when Kubernetes answers.
    pub async fn create(
        &self,
        server: &ServerConfig,
        force_detection: bool,
    ) -> Result<DynOrchestratorAdapter> {
        let key = server.cache_key().to_string();
        if !force_detection {
            if let Some(adapter) = self.get_cached(&key).await {
                debug!(server = %key, "adapter cache hit");
                return Ok(adapter);
            }
        }

        let adapter: DynOrchestratorAdapter = match server.orchestrator_type {
            Some(OrchestratorType::Kubernetes) => {
                telemetry::record_adapter_created(BACKEND_KUBERNETES, "configured");
                Arc::new(KubernetesAdapter::connect(server, &self.config).await?)
            }
            Some(OrchestratorType::Swarm) => {
                telemetry::record_adapter_created(BACKEND_SWARM, "configured");
                self.swarm(server)
            }
            None => self.create_detected(server).await?,
        };

        self.cache.write().await.insert(key, adapter.clone());
        Ok(adapter)
    }

    async fn create_detected(&self, server: &ServerConfig) -> Result<DynOrchestratorAdapter> {
        let detected = self.detect_orchestrator(server).await;
        if !server.is_local() {
            self.store
                .update_orchestrator_type(&server.server_id, detected)
                .await?;
        }
        telemetry::record_adapter_created(detected.as_str(), "detected");

        match detected {
            OrchestratorType::Kubernetes => {
                let adapter = KubernetesAdapter::connect(server, &self.config).await?;
                let capabilities = self.detect_k8s_capabilities(&adapter).await;
                if !server.is_local() {
                    self.store
                        .update_k8s_capabilities(&server.server_id, &capabilities)
                        .await?;
                }
                info!(server = %server.cache_key(), name = %server.name, "kubernetes detected");
                Ok(Arc::new(adapter))
            }
            OrchestratorType::Swarm => {
                info!(server = %server.cache_key(), name = %server.name, "using docker swarm");
                Ok(self.swarm(server))
            }
        }
    }

    fn swarm(&self, server: &ServerConfig) -> DynOrchestratorAdapter {
        Arc::new(SwarmAdapter::new(server.clone(), &self.config))
    }

    /// Kubernetes wins when the server has cluster fields and the API answers;
    /// everything else is Swarm. Never fails.
    pub async fn detect_orchestrator(&self, server: &ServerConfig) -> OrchestratorType {
        if server.has_kubernetes_fields() {
            match KubernetesAdapter::connect(server, &self.config).await {
                Ok(adapter) => {
                    if adapter.detect().await == OrchestratorType::Kubernetes {
                        telemetry::record_detection(BACKEND_KUBERNETES);
                        return OrchestratorType::Kubernetes;
                    }
                }
                Err(err) => {
                    debug!(server = %server.cache_key(), error = %err, "kubernetes client unavailable")
                }
            }
        }

        let health = SwarmAdapter::new(server.clone(), &self.config)
            .health_check()
            .await;
        if health.healthy {
            telemetry::record_detection(BACKEND_SWARM);
        } else {
            warn!(
                server = %server.cache_key(),
                reason = %health.message,
                "no orchestrator answered, assuming swarm"
            );
            telemetry::record_detection("fallback");
        }
        OrchestratorType::Swarm
    }

    pub async fn detect_k8s_capabilities(&self, adapter: &KubernetesAdapter) -> K8sCapabilities {
        adapter.detect_capabilities().await
    }

    pub async fn for_application(&self, application_id: &str) -> Result<DynOrchestratorAdapter> {
        match self
            .store
            .find_server_for_application(application_id)
            .await?
        {
            ApplicationLookup::NotFound => Err(OrchestratorError::ApplicationNotFound(
                application_id.to_string(),
            )),
            ApplicationLookup::Local => self.create(&ServerConfig::local(), false).await,
            ApplicationLookup::Remote(server) => self.create(&server, false).await,
        }
    }

    /// `None` (or an empty id) means the local host.
    pub async fn for_server(&self, server_id: Option<&str>) -> Result<DynOrchestratorAdapter> {
        let Some(server_id) = server_id.filter(|id| !id.is_empty()) else {
            return self.create(&ServerConfig::local(), false).await;
        };
        let server = self
            .store
            .find_server(server_id)
            .await?
            .ok_or_else(|| OrchestratorError::ServerNotFound(server_id.to_string()))?;
        self.create(&server, false).await
    }

    /// Drops one server's adapter, or every adapter when `server_id` is `None`.
    pub async fn clear_cache(&self, server_id: Option<&str>) {
        let mut cache = self.cache.write().await;
        match server_id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
    }

    pub async fn get_cached(&self, key: &str) -> Option<DynOrchestratorAdapter> {
        self.cache.read().await.get(key).cloned()
    }

    pub async fn is_kubernetes(&self, server_id: Option<&str>) -> Result<bool> {
        Ok(self.recorded_type(server_id).await? == Some(OrchestratorType::Kubernetes))
    }

    /// The local host always runs Swarm.
    pub async fn is_swarm(&self, server_id: Option<&str>) -> Result<bool> {
        if server_id.is_none_or(str::is_empty) {
            return Ok(true);
        }
        Ok(self.recorded_type(server_id).await? == Some(OrchestratorType::Swarm))
    }

    async fn recorded_type(&self, server_id: Option<&str>) -> Result<Option<OrchestratorType>> {
        let Some(server_id) = server_id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        Ok(self
            .store
            .find_server(server_id)
            .await?
            .and_then(|server| server.orchestrator_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::supports_hpa;
    use crate::kubernetes::TRAEFIK;
    use crate::store::{InMemoryServerStore, ServerStore};
    use httpmock::prelude::*;
    use serde_json::json;

    fn kubeconfig(url: &str) -> String {
        format!(
            r#"apiVersion: v1
kind: Config
current-context: mock
clusters:
  - name: mock
    cluster:
      server: {url}
contexts:
  - name: mock
    context:
      cluster: mock
      user: mock
users:
  - name: mock
    user: {{}}
"#
        )
    }

    fn swarm_server(id: &str) -> ServerConfig {
        ServerConfig {
            server_id: id.into(),
            name: format!("swarm {id}"),
            orchestrator_type: Some(OrchestratorType::Swarm),
            ip_address: "10.0.0.5".into(),
            ..Default::default()
        }
    }

    fn k8s_server(id: &str, url: &str) -> ServerConfig {
        ServerConfig {
            server_id: id.into(),
            name: format!("cluster {id}"),
            ip_address: "10.0.0.9".into(),
            k8s_namespace: Some("apps".into()),
            k8s_kubeconfig: Some(kubeconfig(url)),
            ..Default::default()
        }
    }

    fn factory(store: &InMemoryServerStore) -> OrchestratorFactory {
        OrchestratorFactory::new(Arc::new(store.clone()), OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn configured_type_is_built_directly_and_cached() {
        let store = InMemoryServerStore::new();
        let factory = factory(&store);
        let server = swarm_server("s1");

        let first = factory.create(&server, false).await.expect("adapter");
        assert_eq!(first.orchestrator_type(), OrchestratorType::Swarm);
        let second = factory.create(&server, false).await.expect("adapter");
        assert!(Arc::ptr_eq(&first, &second));

        let forced = factory.create(&server, true).await.expect("adapter");
        assert!(!Arc::ptr_eq(&first, &forced));
        let cached = factory.get_cached("s1").await.expect("cached");
        assert!(Arc::ptr_eq(&cached, &forced));
    }

    #[tokio::test]
    async fn configured_kubernetes_skips_probing() {
        let mock = MockServer::start_async().await;
        let namespace = mock
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/namespaces/default");
                then.status(200).json_body(json!({ "metadata": { "name": "default" } }));
            })
            .await;

        let store = InMemoryServerStore::new();
        let mut server = k8s_server("k1", &mock.base_url());
        server.orchestrator_type = Some(OrchestratorType::Kubernetes);

        let adapter = factory(&store).create(&server, false).await.expect("adapter");
        assert_eq!(adapter.orchestrator_type(), OrchestratorType::Kubernetes);
        assert!(supports_hpa(adapter.as_ref()));
        assert_eq!(namespace.hits_async().await, 0);
    }

    #[tokio::test]
    async fn detection_persists_type_and_capabilities() {
        let mock = MockServer::start_async().await;
        mock.mock_async(|when, then| {
            when.method(GET).path("/api/v1/namespaces/default");
            then.status(200).json_body(json!({ "metadata": { "name": "default" } }));
        })
        .await;
        mock.mock_async(|when, then| {
            when.method(GET).path(
                "/apis/traefik.io/v1alpha1/namespaces/apps/ingressroutes/dokploy-capability-probe",
            );
            then.status(404).json_body(json!({
                "kind": "Status",
                "status": "Failure",
                "reason": "NotFound",
                "message": "ingressroutes.traefik.io \"dokploy-capability-probe\" not found",
                "code": 404
            }));
        })
        .await;

        let store = InMemoryServerStore::new();
        let server = k8s_server("k1", &mock.base_url());
        store.insert_server(server.clone()).await;

        let factory = factory(&store);
        assert_eq!(
            factory.detect_orchestrator(&server).await,
            OrchestratorType::Kubernetes
        );

        let adapter = factory.create(&server, false).await.expect("adapter");
        assert_eq!(adapter.orchestrator_type(), OrchestratorType::Kubernetes);

        let stored = store.find_server("k1").await.unwrap().expect("server");
        assert_eq!(stored.orchestrator_type, Some(OrchestratorType::Kubernetes));
        let capabilities = stored.k8s_capabilities.expect("capabilities");
        assert_eq!(capabilities.ingress_controller.as_deref(), Some(TRAEFIK));
        assert!(!capabilities.supports_hpa);
        assert!(capabilities.supports_pod_disruption_budget);
        assert!(factory.is_kubernetes(Some("k1")).await.unwrap());
        assert!(!factory.is_swarm(Some("k1")).await.unwrap());
    }

    #[tokio::test]
    async fn unanswered_kubernetes_falls_back_to_swarm() {
        let mock = MockServer::start_async().await;
        let store = InMemoryServerStore::new();
        let mut server = k8s_server("", &mock.base_url());
        server.name = "local".into();

        let factory = factory(&store);
        assert_eq!(
            factory.detect_orchestrator(&server).await,
            OrchestratorType::Swarm
        );
    }

    #[tokio::test]
    async fn lookups_report_missing_records() {
        let store = InMemoryServerStore::new();
        let factory = factory(&store);

        let err = factory.for_server(Some("ghost")).await.err().expect("missing");
        assert_eq!(err.to_string(), "Server not found: ghost");
        let err = factory.for_application("app-1").await.err().expect("missing");
        assert_eq!(err.to_string(), "Application not found: app-1");
    }

    #[tokio::test]
    async fn local_applications_use_cached_local_swarm() {
        let store = InMemoryServerStore::new();
        store.insert_application("app-1", None).await;
        store.insert_server(swarm_server("s1")).await;
        store.insert_application("app-2", Some("s1")).await;
        let factory = factory(&store);

        let local = factory.for_application("app-1").await.expect("local");
        assert_eq!(local.orchestrator_type(), OrchestratorType::Swarm);
        let again = factory.for_server(None).await.expect("local");
        assert!(Arc::ptr_eq(&local, &again));

        factory.for_application("app-2").await.expect("remote");
        assert!(factory.get_cached("s1").await.is_some());

        factory.clear_cache(Some("s1")).await;
        assert!(factory.get_cached("s1").await.is_none());
        assert!(factory.get_cached("local").await.is_some());
        factory.clear_cache(None).await;
        assert!(factory.get_cached("local").await.is_none());
    }

    #[tokio::test]
    async fn recorded_types_answer_kind_questions() {
        let store = InMemoryServerStore::with_servers([swarm_server("s1")]);
        let factory = factory(&store);

        assert!(factory.is_swarm(None).await.unwrap());
        assert!(!factory.is_kubernetes(None).await.unwrap());
        assert!(factory.is_swarm(Some("s1")).await.unwrap());
        assert!(!factory.is_kubernetes(Some("s1")).await.unwrap());
        assert!(!factory.is_swarm(Some("unknown")).await.unwrap());
    }
}
