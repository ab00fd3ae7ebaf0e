//! Backend-neutral orchestration contract.
//!
//! Every backend implements [`OrchestratorAdapter`]. Features only some
//! clusters offer live on separate capability traits; an adapter exposes them
//! through the `as_*` accessors, so callers narrow once at the guard:
//!
//! ```ignore
//! if let Some(hpa) = adapter.as_hpa() {
//!     hpa.configure_hpa(&config).await?;
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use common::api::{
    CustomResource, Deployment, DeploymentConfig, DeploymentEvent, DeploymentPatch, HealthStatus,
    HpaConfig, HpaStatus, Ingress, IngressConfig, LogOptions, NetworkPolicyConfig,
    OrchestratorType, ResourceMetrics, Service, ServiceConfig, ServicePatch,
};

use crate::error::Result;
use crate::logs::LogStream;

pub type DynOrchestratorAdapter = Arc<dyn OrchestratorAdapter>;

#[async_trait]
pub trait OrchestratorAdapter: Send + Sync {
    fn orchestrator_type(&self) -> OrchestratorType;

    /// Which orchestrator answers at this adapter's endpoint. Never fails.
    async fn detect(&self) -> OrchestratorType;
    /// Never fails; connection problems become an unhealthy status.
    async fn health_check(&self) -> HealthStatus;
    async fn get_version(&self) -> Result<String>;

    async fn deploy_application(&self, config: &DeploymentConfig) -> Result<Deployment>;
    /// `None` when the workload does not exist.
    async fn get_deployment(&self, name: &str, namespace: Option<&str>)
        -> Result<Option<Deployment>>;
    async fn scale_application(
        &self,
        name: &str,
        replicas: u32,
        namespace: Option<&str>,
    ) -> Result<()>;
    async fn update_application(
        &self,
        name: &str,
        patch: &DeploymentPatch,
        namespace: Option<&str>,
    ) -> Result<Deployment>;
    async fn delete_application(&self, name: &str, namespace: Option<&str>) -> Result<()>;
    /// Rolls back to `revision`, or to the previous revision when unset.
    async fn rollback_application(
        &self,
        name: &str,
        revision: Option<i64>,
        namespace: Option<&str>,
    ) -> Result<()>;
    async fn restart_application(&self, name: &str, namespace: Option<&str>) -> Result<()>;
    async fn list_deployments(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Deployment>>;

    async fn create_service(&self, config: &ServiceConfig) -> Result<Service>;
    async fn get_service(&self, name: &str, namespace: Option<&str>) -> Result<Option<Service>>;
    async fn update_service(
        &self,
        name: &str,
        patch: &ServicePatch,
        namespace: Option<&str>,
    ) -> Result<Service>;
    async fn delete_service(&self, name: &str, namespace: Option<&str>) -> Result<()>;

    async fn configure_ingress(&self, config: &IngressConfig) -> Result<Ingress>;
    async fn get_ingress(&self, name: &str, namespace: Option<&str>) -> Result<Option<Ingress>>;
    async fn delete_ingress(&self, name: &str, namespace: Option<&str>) -> Result<()>;

    /// `None` when nothing is running or no sample is available.
    async fn get_metrics(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ResourceMetrics>>;
    async fn get_logs(
        &self,
        name: &str,
        options: &LogOptions,
        namespace: Option<&str>,
    ) -> Result<Vec<String>>;
    async fn stream_logs(
        &self,
        name: &str,
        options: &LogOptions,
        namespace: Option<&str>,
    ) -> Result<LogStream>;
    async fn get_events(&self, name: &str, namespace: Option<&str>)
        -> Result<Vec<DeploymentEvent>>;

    fn as_hpa(&self) -> Option<&dyn HpaCapable> {
        None
    }

    fn as_network_policies(&self) -> Option<&dyn NetworkPolicyCapable> {
        None
    }

    fn as_custom_resources(&self) -> Option<&dyn CustomResourceCapable> {
        None
    }

    fn as_namespaces(&self) -> Option<&dyn NamespaceCapable> {
        None
    }
}

#[async_trait]
pub trait HpaCapable: Send + Sync {
    async fn configure_hpa(&self, config: &HpaConfig) -> Result<()>;
    /// Status of the autoscaler named `name`; `None` when absent.
    async fn get_hpa_status(&self, name: &str, namespace: Option<&str>)
        -> Result<Option<HpaStatus>>;
    async fn delete_hpa(&self, name: &str, namespace: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait NetworkPolicyCapable: Send + Sync {
    async fn create_network_policy(&self, policy: &NetworkPolicyConfig) -> Result<()>;
    async fn get_network_policy(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<NetworkPolicyConfig>>;
    async fn delete_network_policy(&self, name: &str, namespace: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait CustomResourceCapable: Send + Sync {
    async fn create_custom_resource(&self, resource: &CustomResource) -> Result<CustomResource>;
    async fn get_custom_resource(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<CustomResource>>;
    async fn delete_custom_resource(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
pub trait NamespaceCapable: Send + Sync {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;
    async fn list_namespaces(&self) -> Result<Vec<String>>;
}

pub fn supports_hpa(adapter: &dyn OrchestratorAdapter) -> bool {
    adapter.as_hpa().is_some()
}

pub fn supports_network_policies(adapter: &dyn OrchestratorAdapter) -> bool {
    adapter.as_network_policies().is_some()
}

pub fn supports_custom_resources(adapter: &dyn OrchestratorAdapter) -> bool {
    adapter.as_custom_resources().is_some()
}

pub fn supports_namespaces(adapter: &dyn OrchestratorAdapter) -> bool {
    adapter.as_namespaces().is_some()
}
