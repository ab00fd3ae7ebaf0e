//! API server client construction from a server record.

use std::path::PathBuf;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::api::ServerConfig;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Default)]
pub struct KubernetesConnection {
    /// Inline kubeconfig, base64 or raw YAML.
    pub kubeconfig: Option<String>,
    pub kubeconfig_path: Option<PathBuf>,
    pub context: Option<String>,
    /// Replaces the cluster URL of whatever config was loaded.
    pub api_endpoint: Option<String>,
    pub namespace: String,
}

impl KubernetesConnection {
    pub fn from_server(server: &ServerConfig, default_namespace: &str) -> Self {
        Self {
            kubeconfig: server.k8s_kubeconfig.clone().filter(|k| !k.trim().is_empty()),
            kubeconfig_path: server.k8s_kubeconfig_path.as_ref().map(PathBuf::from),
            context: server.k8s_context.clone(),
            api_endpoint: server.k8s_api_endpoint.clone(),
            namespace: server
                .k8s_namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| default_namespace.to_string()),
        }
    }

    fn options(&self) -> KubeConfigOptions {
        KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        }
    }

    /// Resolves the client config: inline kubeconfig, kubeconfig file, then
    /// the in-cluster account or default inference.
    pub async fn client_config(&self) -> Result<Config> {
        let mut config = match (&self.kubeconfig, &self.kubeconfig_path) {
            (Some(inline), _) => {
                let kubeconfig = decode_kubeconfig(inline)?;
                Config::from_custom_kubeconfig(kubeconfig, &self.options())
                    .await
                    .map_err(|err| OrchestratorError::Kubeconfig(err.into()))?
            }
            (None, Some(path)) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("reading {}", path.display()))
                    .map_err(OrchestratorError::Kubeconfig)?;
                Config::from_custom_kubeconfig(kubeconfig, &self.options())
                    .await
                    .map_err(|err| OrchestratorError::Kubeconfig(err.into()))?
            }
            (None, None) => self.ambient_config().await?,
        };

        if let Some(endpoint) = &self.api_endpoint {
            config.cluster_url = endpoint
                .parse()
                .with_context(|| format!("invalid API endpoint {endpoint}"))
                .map_err(OrchestratorError::Kubeconfig)?;
        }
        config.default_namespace = self.namespace.clone();
        Ok(config)
    }

    async fn ambient_config(&self) -> Result<Config> {
        if self.context.is_some() {
            return Config::from_kubeconfig(&self.options())
                .await
                .map_err(|err| OrchestratorError::Kubeconfig(err.into()));
        }
        match Config::incluster() {
            Ok(config) => Ok(config),
            Err(err) => {
                debug!(error = %err, "not running in a cluster, inferring kubeconfig");
                Config::infer()
                    .await
                    .map_err(|err| OrchestratorError::Kubeconfig(err.into()))
            }
        }
    }
}

/// Accepts base64-encoded or plain YAML kubeconfig text.
pub(crate) fn decode_kubeconfig(raw: &str) -> Result<Kubeconfig> {
    let trimmed = raw.trim();
    let decoded = STANDARD
        .decode(trimmed)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    if let Some(text) = decoded {
        if let Ok(kubeconfig) = Kubeconfig::from_yaml(&text) {
            return Ok(kubeconfig);
        }
    }
    Kubeconfig::from_yaml(trimmed).map_err(|err| OrchestratorError::Kubeconfig(err.into()))
}
