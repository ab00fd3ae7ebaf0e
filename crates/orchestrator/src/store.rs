//! Server records the factory reads and writes back detection results to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::api::{K8sCapabilities, OrchestratorType, ServerConfig};
use tokio::sync::RwLock;

use crate::error::{OrchestratorError, Result};

/// Where an application runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationLookup {
    NotFound,
    /// On the Dokploy host itself.
    Local,
    Remote(ServerConfig),
}

pub type DynServerStore = Arc<dyn ServerStore>;

#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn find_server(&self, server_id: &str) -> Result<Option<ServerConfig>>;
    async fn find_server_for_application(&self, application_id: &str) -> Result<ApplicationLookup>;
    async fn update_orchestrator_type(
        &self,
        server_id: &str,
        orchestrator_type: OrchestratorType,
    ) -> Result<()>;
    async fn update_k8s_capabilities(
        &self,
        server_id: &str,
        capabilities: &K8sCapabilities,
    ) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryServerStore {
    servers: Arc<RwLock<HashMap<String, ServerConfig>>>,
    /// Application id to its server id; `None` means local.
    applications: Arc<RwLock<HashMap<String, Option<String>>>>,
}

impl InMemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_servers(servers: impl IntoIterator<Item = ServerConfig>) -> Self {
        let servers = servers
            .into_iter()
            .map(|server| (server.server_id.clone(), server))
            .collect();
        Self {
            servers: Arc::new(RwLock::new(servers)),
            applications: Arc::default(),
        }
    }

    pub async fn insert_server(&self, server: ServerConfig) {
        self.servers
            .write()
            .await
            .insert(server.server_id.clone(), server);
    }

    pub async fn insert_application(&self, application_id: &str, server_id: Option<&str>) {
        self.applications
            .write()
            .await
            .insert(application_id.to_string(), server_id.map(str::to_string));
    }

    async fn modify<F>(&self, server_id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut ServerConfig),
    {
        let mut servers = self.servers.write().await;
        let server = servers
            .get_mut(server_id)
            .ok_or_else(|| OrchestratorError::ServerNotFound(server_id.to_string()))?;
        change(server);
        Ok(())
    }
}

#[async_trait]
impl ServerStore for InMemoryServerStore {
    async fn find_server(&self, server_id: &str) -> Result<Option<ServerConfig>> {
        Ok(self.servers.read().await.get(server_id).cloned())
    }

    async fn find_server_for_application(&self, application_id: &str) -> Result<ApplicationLookup> {
        let server_id = match self.applications.read().await.get(application_id) {
            None => return Ok(ApplicationLookup::NotFound),
            Some(None) => return Ok(ApplicationLookup::Local),
            Some(Some(server_id)) => server_id.clone(),
        };
        match self.find_server(&server_id).await? {
            Some(server) => Ok(ApplicationLookup::Remote(server)),
            None => Err(OrchestratorError::ServerNotFound(server_id)),
        }
    }

    async fn update_orchestrator_type(
        &self,
        server_id: &str,
        orchestrator_type: OrchestratorType,
    ) -> Result<()> {
        self.modify(server_id, |server| {
            server.orchestrator_type = Some(orchestrator_type)
        })
        .await
    }

    async fn update_k8s_capabilities(
        &self,
        server_id: &str,
        capabilities: &K8sCapabilities,
    ) -> Result<()> {
        let capabilities = capabilities.clone();
        self.modify(server_id, |server| {
            server.k8s_capabilities = Some(capabilities)
        })
        .await
    }
}
