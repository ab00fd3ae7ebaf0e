//! Kubernetes backend over the API server.
//!
//! Typed `Api` handles are built per call from one shared [`Client`]. Writes
//! are read-then-replace-or-create so every operation can be repeated; reads
//! turn a 404 into `None` and propagate everything else.

mod client;
pub(crate) mod manifests;
pub(crate) mod probe;
pub(crate) mod status;

use std::collections::HashSet;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use common::api::{
    CustomResource, Deployment, DeploymentConfig, DeploymentEvent, DeploymentPatch, HealthDetails,
    HealthStatus, HpaConfig, HpaStatus, Ingress, IngressConfig, K8sCapabilities, LogOptions,
    NetworkPolicyConfig, OrchestratorType, ResourceMetrics, ServerConfig, Service, ServiceConfig,
    ServicePatch,
};
use futures_util::{pin_mut, AsyncBufReadExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Service as K8sService};
use k8s_openapi::api::networking::v1::{Ingress as K8sIngress, NetworkPolicy};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams,
    PostParams,
};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapter::{
    CustomResourceCapable, HpaCapable, NamespaceCapable, NetworkPolicyCapable, OrchestratorAdapter,
};
use crate::config::OrchestratorConfig;
use crate::error::{is_kube_not_found, OrchestratorError, Result};
use crate::logs::{self, LogStream};
use crate::{telemetry, traefik};

pub use client::KubernetesConnection;

const BACKEND: &str = "kubernetes";
const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";
pub const TRAEFIK: &str = "traefik";

pub struct KubernetesAdapter {
    client: Client,
    namespace: String,
    api_endpoint: Option<String>,
    log_buffer: usize,
}

impl KubernetesAdapter {
    /// Builds the client from the server's kubeconfig fields. No request is
    /// made until the first operation.
    pub async fn connect(server: &ServerConfig, config: &OrchestratorConfig) -> Result<Self> {
        let connection = KubernetesConnection::from_server(server, &config.default_namespace);
        let client_config = connection.client_config().await?;
        let api_endpoint = client_config.cluster_url.to_string();
        let client = Client::try_from(client_config).map_err(|err| {
            OrchestratorError::Connection {
                context: "build_client",
                source: err.into(),
            }
        })?;
        debug!(
            server = %server.cache_key(),
            endpoint = %api_endpoint,
            namespace = %connection.namespace,
            "kubernetes client ready"
        );
        Ok(Self {
            client,
            namespace: connection.namespace,
            api_endpoint: Some(api_endpoint),
            log_buffer: config.log_buffer,
        })
    }

    pub fn from_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            api_endpoint: None,
            log_buffer: logs::DEFAULT_LOG_BUFFER,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn ns<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.namespace)
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    /// Probes the optional APIs this cluster serves.
    pub async fn detect_capabilities(&self) -> K8sCapabilities {
        let ns = &self.namespace;
        let supports_hpa = probe::probe(&self.client, ns, &probe::hpa_resource()).await;
        let metrics_server = probe::metrics_server(&self.client, ns).await;
        let network_policies =
            probe::probe(&self.client, ns, &probe::network_policy_resource()).await;
        let traefik = probe::probe(&self.client, ns, &probe::ingress_route_resource()).await;
        let storage_classes = probe::storage_classes(&self.client).await;

        for (capability, present) in [
            ("hpa", supports_hpa),
            ("metrics_server", metrics_server),
            ("network_policies", network_policies),
            ("traefik", traefik),
        ] {
            telemetry::record_capability_probe(capability, present);
        }

        let capabilities = K8sCapabilities {
            supports_hpa,
            supports_network_policies: network_policies,
            metrics_server_installed: metrics_server,
            ingress_controller: traefik.then(|| TRAEFIK.to_string()),
            storage_classes,
            supports_pod_disruption_budget: true,
        };
        info!(
            namespace = %ns,
            hpa = supports_hpa,
            metrics_server,
            network_policies,
            traefik,
            "probed kubernetes capabilities"
        );
        capabilities
    }

    async fn apply_custom(&self, resource: &CustomResource) -> Result<CustomResource> {
        let namespace = self.ns(resource.metadata.namespace.as_deref()).to_string();
        let api_resource = probe::custom_resource(&resource.api_version, &resource.kind);
        let api = self.dynamic(&namespace, &api_resource);
        let mut object = status::to_dynamic(resource, &namespace, &api_resource);
        let name = &resource.metadata.name;

        let stored = match api.create(&PostParams::default(), &object).await {
            Ok(created) => created,
            Err(err) => {
                let err = OrchestratorError::kube("create_custom_resource", err);
                if !err.is_conflict() {
                    return Err(err);
                }
                let current = api
                    .get(name)
                    .await
                    .map_err(|err| OrchestratorError::kube("get_custom_resource", err))?;
                object.metadata.resource_version = current.metadata.resource_version;
                api.replace(name, &PostParams::default(), &object)
                    .await
                    .map_err(|err| OrchestratorError::kube("replace_custom_resource", err))?
            }
        };
        debug!(kind = %resource.kind, name = %name, namespace = %namespace, "applied custom resource");
        Ok(status::to_custom_resource(&stored, &api_resource))
    }

    async fn first_pod(&self, app: &str, namespace: &str) -> Result<Option<String>> {
        let pods: Api<Pod> = self.api(namespace);
        let list = pods
            .list(&ListParams::default().labels(&app_label(app)))
            .await
            .map_err(|err| OrchestratorError::kube("list_pods", err))?;
        Ok(list.items.into_iter().find_map(|pod| pod.metadata.name))
    }

    async fn patch_deployment(
        &self,
        name: &str,
        namespace: &str,
        patch: serde_json::Value,
        context: &'static str,
    ) -> Result<()> {
        let deployments: Api<K8sDeployment> = self.api(namespace);
        deployments
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| OrchestratorError::kube(context, err))?;
        Ok(())
    }

    async fn delete_strip_prefix(&self, route: &str, namespace: &str) {
        let base = route.strip_suffix("-ingress").unwrap_or(route);
        let middlewares = self.dynamic(
            namespace,
            &probe::custom_resource(traefik::API_VERSION, traefik::MIDDLEWARE_KIND),
        );
        if let Err(err) = middlewares
            .delete(&traefik::strip_prefix_name(base), &DeleteParams::default())
            .await
        {
            if !is_kube_not_found(&err) {
                debug!(route = %route, error = %err, "strip-prefix middleware not removed");
            }
        }
    }
}

fn app_label(app: &str) -> String {
    format!("{}={app}", manifests::APP_LABEL)
}

async fn fetch<K>(api: &Api<K>, name: &str, context: &'static str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(object) => Ok(Some(object)),
        Err(err) if is_kube_not_found(&err) => Ok(None),
        Err(err) => Err(OrchestratorError::kube(context, err)),
    }
}

async fn fetch_existing<K>(
    api: &Api<K>,
    kind: &'static str,
    name: &str,
    context: &'static str,
) -> Result<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    fetch(api, name, context)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound {
            kind,
            name: name.to_string(),
        })
}

/// Replaces `name` with `desired` when it exists, creating it otherwise.
/// `carry` copies server-owned fields from the stored object first.
async fn upsert_with<K, F>(
    api: &Api<K>,
    name: &str,
    mut desired: K,
    context: &'static str,
    carry: F,
) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
    F: FnOnce(&mut K, &K),
{
    let stored = match fetch(api, name, context).await? {
        Some(current) => {
            desired.meta_mut().resource_version = current.meta().resource_version.clone();
            carry(&mut desired, &current);
            api.replace(name, &PostParams::default(), &desired).await
        }
        None => api.create(&PostParams::default(), &desired).await,
    };
    stored.map_err(|err| OrchestratorError::kube(context, err))
}

async fn upsert<K>(api: &Api<K>, name: &str, desired: K, context: &'static str) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    upsert_with(api, name, desired, context, |_, _| {}).await
}

async fn remove<K>(api: &Api<K>, name: &str, context: &'static str) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default())
        .await
        .map(|_| ())
        .map_err(|err| OrchestratorError::kube(context, err))
}

/// Dependents removed ahead of the deployment may already be gone.
fn tolerate(kind: &str, name: &str, result: Result<()>) {
    match result {
        Ok(()) => debug!(kind, name, "removed"),
        Err(err) if err.is_not_found() => debug!(kind, name, "already absent"),
        Err(err) => warn!(kind, name, error = %err, "failed to remove, continuing"),
    }
}

fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn log_params(options: &LogOptions, follow: bool) -> LogParams {
    LogParams {
        container: options.container.clone(),
        follow,
        previous: options.previous,
        since_seconds: if options.since_time.is_some() {
            None
        } else {
            options.since_seconds
        },
        since_time: options.since_time,
        tail_lines: options.tail_lines,
        timestamps: options.timestamps,
        ..Default::default()
    }
}

#[async_trait]
impl OrchestratorAdapter for KubernetesAdapter {
    fn orchestrator_type(&self) -> OrchestratorType {
        OrchestratorType::Kubernetes
    }

    async fn detect(&self) -> OrchestratorType {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.get("default").await {
            Ok(_) => OrchestratorType::Kubernetes,
            Err(err) => {
                debug!(error = %err, "no kubernetes API at this endpoint");
                OrchestratorType::Swarm
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let version = match self.client.apiserver_version().await {
            Ok(info) => format!("{}.{}", info.major, info.minor),
            Err(err) => {
                let err = OrchestratorError::kube("version", err);
                warn!(error = %err, "kubernetes health check failed");
                return HealthStatus::unhealthy(format!("Failed to connect to Kubernetes: {err}"));
            }
        };
        let nodes: Api<Node> = Api::all(self.client.clone());
        let ready = match nodes.list(&ListParams::default()).await {
            Ok(list) => list.items.iter().filter(|node| node_ready(node)).count(),
            Err(err) => {
                let err = OrchestratorError::kube("list_nodes", err);
                warn!(error = %err, "kubernetes health check failed");
                return HealthStatus::unhealthy(format!("Failed to connect to Kubernetes: {err}"));
            }
        };

        let message = if ready > 0 {
            format!("Kubernetes cluster is healthy with {ready} ready nodes")
        } else {
            "Kubernetes cluster has no ready nodes".to_string()
        };
        HealthStatus {
            healthy: ready > 0,
            message,
            details: Some(HealthDetails {
                version: Some(version),
                nodes: Some(ready as i64),
                api_endpoint: self.api_endpoint.clone(),
                last_check: Some(Utc::now()),
            }),
        }
    }

    async fn get_version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|err| OrchestratorError::kube("version", err))?;
        Ok(format!("{}.{}", info.major, info.minor))
    }

    async fn deploy_application(&self, config: &DeploymentConfig) -> Result<Deployment> {
        telemetry::timed(BACKEND, "deploy_application", async {
            let namespace = self.ns(config.namespace.as_deref()).to_string();
            self.ensure_namespace(&namespace).await?;

            let deployments: Api<K8sDeployment> = self.api(&namespace);
            upsert(
                &deployments,
                &config.name,
                manifests::deployment(config, &namespace),
                "apply_deployment",
            )
            .await?;
            info!(deployment = %config.name, namespace = %namespace, image = %config.image, "applied deployment");

            if !config.ports.is_empty() {
                self.create_service(&manifests::deployment_service(config, &namespace))
                    .await?;
            }

            if let Some(ingress) = manifests::deployment_ingress(config, &namespace) {
                self.configure_ingress(&ingress).await?;
            }

            if let Some(hpa) = config.hpa.as_ref().filter(|hpa| hpa.enabled) {
                let hpa = HpaConfig {
                    name: Some(manifests::hpa_name(&config.name)),
                    namespace: Some(namespace.clone()),
                    target_name: config.name.clone(),
                    ..hpa.clone()
                };
                self.configure_hpa(&hpa).await?;
            }

            if let Some(policy) = &config.network_policy {
                let policy = NetworkPolicyConfig {
                    namespace: Some(namespace.clone()),
                    ..policy.clone()
                };
                self.create_network_policy(&policy).await?;
            }

            if let Some(pdb) = &config.pdb {
                let budgets: Api<PodDisruptionBudget> = self.api(&namespace);
                upsert(
                    &budgets,
                    &manifests::pdb_name(&config.name),
                    manifests::pdb(&config.name, &namespace, pdb),
                    "apply_pdb",
                )
                .await?;
            }

            let deployed =
                fetch_existing(&deployments, "deployment", &config.name, "reread_deployment")
                    .await?;
            Ok(status::to_deployment(&deployed))
        })
        .await
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<Deployment>> {
        let deployments: Api<K8sDeployment> = self.api(self.ns(namespace));
        Ok(fetch(&deployments, name, "get_deployment")
            .await?
            .map(|deployment| status::to_deployment(&deployment)))
    }

    async fn scale_application(
        &self,
        name: &str,
        replicas: u32,
        namespace: Option<&str>,
    ) -> Result<()> {
        telemetry::timed(BACKEND, "scale_application", async {
            let deployments: Api<K8sDeployment> = self.api(self.ns(namespace));
            let patch = json!({ "spec": { "replicas": replicas } });
            deployments
                .patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|err| OrchestratorError::kube("patch_scale", err))?;
            info!(deployment = %name, replicas, "scaled deployment");
            Ok(())
        })
        .await
    }

    async fn update_application(
        &self,
        name: &str,
        patch: &DeploymentPatch,
        namespace: Option<&str>,
    ) -> Result<Deployment> {
        telemetry::timed(BACKEND, "update_application", async {
            let deployments: Api<K8sDeployment> = self.api(self.ns(namespace));
            let mut deployment =
                fetch_existing(&deployments, "deployment", name, "get_deployment").await?;
            manifests::apply_patch(&mut deployment, patch);
            let replaced = deployments
                .replace(name, &PostParams::default(), &deployment)
                .await
                .map_err(|err| OrchestratorError::kube("replace_deployment", err))?;
            info!(deployment = %name, "updated deployment");
            Ok(status::to_deployment(&replaced))
        })
        .await
    }

    async fn delete_application(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        telemetry::timed(BACKEND, "delete_application", async {
            let ns = self.ns(namespace);

            let hpas: Api<HorizontalPodAutoscaler> = self.api(ns);
            let hpa = manifests::hpa_name(name);
            tolerate("hpa", &hpa, remove(&hpas, &hpa, "delete_hpa").await);

            let services: Api<K8sService> = self.api(ns);
            tolerate("service", name, remove(&services, name, "delete_service").await);

            let route = traefik::route_name(name);
            tolerate("ingress", &route, self.delete_ingress(&route, Some(ns)).await);

            let policies: Api<NetworkPolicy> = self.api(ns);
            let policy = manifests::network_policy_name(name);
            tolerate(
                "network_policy",
                &policy,
                remove(&policies, &policy, "delete_network_policy").await,
            );

            let deployments: Api<K8sDeployment> = self.api(ns);
            remove(&deployments, name, "delete_deployment").await?;
            info!(deployment = %name, namespace = %ns, "deleted application");
            Ok(())
        })
        .await
    }

    async fn rollback_application(
        &self,
        name: &str,
        revision: Option<i64>,
        namespace: Option<&str>,
    ) -> Result<()> {
        telemetry::timed(BACKEND, "rollback_application", async {
            let revision = revision.unwrap_or(0);
            let patch = json!({ "spec": { "rollbackTo": { "revision": revision } } });
            self.patch_deployment(name, self.ns(namespace), patch, "rollback_deployment")
                .await?;
            info!(deployment = %name, revision, "requested rollback");
            Ok(())
        })
        .await
    }

    async fn restart_application(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        telemetry::timed(BACKEND, "restart_application", async {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            let patch = json!({
                "spec": { "template": { "metadata": { "annotations": { RESTARTED_AT: now } } } }
            });
            self.patch_deployment(name, self.ns(namespace), patch, "restart_deployment")
                .await?;
            info!(deployment = %name, "restarted deployment");
            Ok(())
        })
        .await
    }

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Deployment>> {
        let deployments: Api<K8sDeployment> = self.api(self.ns(namespace));
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }
        let list = deployments
            .list(&params)
            .await
            .map_err(|err| OrchestratorError::kube("list_deployments", err))?;
        Ok(list.items.iter().map(status::to_deployment).collect())
    }

    async fn create_service(&self, config: &ServiceConfig) -> Result<Service> {
        let namespace = self.ns(config.namespace.as_deref());
        let services: Api<K8sService> = self.api(namespace);
        let stored = upsert_with(
            &services,
            &config.name,
            manifests::service(config, namespace),
            "apply_service",
            manifests::preserve_service_identity,
        )
        .await?;
        debug!(service = %config.name, namespace = %namespace, "applied service");
        Ok(status::to_service(&stored, &config.name))
    }

    async fn get_service(&self, name: &str, namespace: Option<&str>) -> Result<Option<Service>> {
        let services: Api<K8sService> = self.api(self.ns(namespace));
        Ok(fetch(&services, name, "get_service")
            .await?
            .map(|service| status::to_service(&service, name)))
    }

    async fn update_service(
        &self,
        name: &str,
        patch: &ServicePatch,
        namespace: Option<&str>,
    ) -> Result<Service> {
        let services: Api<K8sService> = self.api(self.ns(namespace));
        let mut service = fetch_existing(&services, "service", name, "get_service").await?;
        manifests::apply_service_patch(&mut service, patch);
        let replaced = services
            .replace(name, &PostParams::default(), &service)
            .await
            .map_err(|err| OrchestratorError::kube("replace_service", err))?;
        Ok(status::to_service(&replaced, name))
    }

    async fn delete_service(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        let services: Api<K8sService> = self.api(self.ns(namespace));
        remove(&services, name, "delete_service").await
    }

    async fn configure_ingress(&self, config: &IngressConfig) -> Result<Ingress> {
        telemetry::timed(BACKEND, "configure_ingress", async {
            let namespace = self.ns(config.namespace.as_deref()).to_string();
            if let Some(middleware) = traefik::build_strip_prefix_middleware(config, &namespace) {
                self.apply_custom(&middleware).await?;
            }
            let route = traefik::build_ingress_route(config, &namespace);
            let stored = self.apply_custom(&route).await?;
            info!(route = %stored.metadata.name, domain = %config.domain, "applied ingress route");
            Ok(traefik::ingress_from_route(&config.name, &stored))
        })
        .await
    }

    async fn get_ingress(&self, name: &str, namespace: Option<&str>) -> Result<Option<Ingress>> {
        let ns = self.ns(namespace);
        let route_resource = probe::ingress_route_resource();
        let routes = self.dynamic(ns, &route_resource);
        if let Some(route) = fetch(&routes, &traefik::route_name(name), "get_ingress_route").await? {
            let route = status::to_custom_resource(&route, &route_resource);
            return Ok(Some(traefik::ingress_from_route(name, &route)));
        }

        let ingresses: Api<K8sIngress> = self.api(ns);
        Ok(fetch(&ingresses, name, "get_ingress")
            .await?
            .map(|ingress| status::to_ingress(&ingress, name)))
    }

    async fn delete_ingress(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        let ns = self.ns(namespace);
        let routes = self.dynamic(ns, &probe::ingress_route_resource());
        let route = traefik::route_name(name);
        match routes.delete(&route, &DeleteParams::default()).await {
            Ok(_) => {
                self.delete_strip_prefix(&route, ns).await;
                Ok(())
            }
            Err(err) if is_kube_not_found(&err) => {
                let ingresses: Api<K8sIngress> = self.api(ns);
                remove(&ingresses, name, "delete_ingress").await
            }
            Err(err) => Err(OrchestratorError::kube("delete_ingress_route", err)),
        }
    }

    async fn get_metrics(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ResourceMetrics>> {
        let ns = self.ns(namespace);
        let pods: Api<Pod> = self.api(ns);
        let list = pods
            .list(&ListParams::default().labels(&app_label(name)))
            .await
            .map_err(|err| OrchestratorError::kube("list_pods", err))?;
        let pod_names: HashSet<String> = list
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect();
        if pod_names.is_empty() {
            return Ok(None);
        }

        let samples = match self
            .dynamic(ns, &probe::pod_metrics_resource())
            .list(&ListParams::default())
            .await
        {
            Ok(list) => list.items,
            Err(err) => {
                debug!(app = %name, error = %err, "pod metrics unavailable");
                return Ok(None);
            }
        };
        Ok(status::to_metrics(name, ns, &pod_names, &samples, Utc::now()))
    }

    async fn get_logs(
        &self,
        name: &str,
        options: &LogOptions,
        namespace: Option<&str>,
    ) -> Result<Vec<String>> {
        let ns = self.ns(namespace);
        let Some(pod) = self.first_pod(name, ns).await? else {
            return Ok(Vec::new());
        };
        let pods: Api<Pod> = self.api(ns);
        let text = pods
            .logs(&pod, &log_params(options, false))
            .await
            .map_err(|err| OrchestratorError::kube("pod_logs", err))?;
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn stream_logs(
        &self,
        name: &str,
        options: &LogOptions,
        namespace: Option<&str>,
    ) -> Result<LogStream> {
        let ns = self.ns(namespace).to_string();
        let (sink, stream) = logs::channel(self.log_buffer);
        let Some(pod) = self.first_pod(name, &ns).await? else {
            debug!(app = %name, "no pod to stream logs from");
            return Ok(stream);
        };

        let pods: Api<Pod> = self.api(&ns);
        let params = log_params(options, true);
        tokio::spawn(async move {
            let reader = match pods.log_stream(&pod, &params).await {
                Ok(reader) => reader,
                Err(err) => {
                    warn!(pod = %pod, error = %err, "opening log stream failed");
                    return;
                }
            };
            let lines = reader.lines();
            pin_mut!(lines);
            loop {
                tokio::select! {
                    _ = sink.cancelled() => break,
                    next = lines.next() => match next {
                        Some(Ok(line)) => {
                            if !sink.send(line).await {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(pod = %pod, error = %err, "log stream interrupted");
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!(pod = %pod, "log stream closed");
        });

        Ok(stream)
    }

    async fn get_events(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<DeploymentEvent>> {
        let events: Api<Event> = self.api(self.ns(namespace));
        let list = events
            .list(&ListParams::default().fields(&format!("involvedObject.name={name}")))
            .await
            .map_err(|err| OrchestratorError::kube("list_events", err))?;
        let now = Utc::now();
        Ok(list
            .items
            .iter()
            .map(|event| status::to_event(event, now))
            .collect())
    }

    fn as_hpa(&self) -> Option<&dyn HpaCapable> {
        Some(self)
    }

    fn as_network_policies(&self) -> Option<&dyn NetworkPolicyCapable> {
        Some(self)
    }

    fn as_custom_resources(&self) -> Option<&dyn CustomResourceCapable> {
        Some(self)
    }

    fn as_namespaces(&self) -> Option<&dyn NamespaceCapable> {
        Some(self)
    }
}

#[async_trait]
impl HpaCapable for KubernetesAdapter {
    async fn configure_hpa(&self, config: &HpaConfig) -> Result<()> {
        let namespace = self.ns(config.namespace.as_deref());
        let desired = manifests::hpa(config, namespace);
        let name = desired.metadata.name.clone().unwrap_or_default();
        let hpas: Api<HorizontalPodAutoscaler> = self.api(namespace);
        upsert(&hpas, &name, desired, "apply_hpa").await?;
        info!(hpa = %name, target = %config.target_name, "configured autoscaler");
        Ok(())
    }

    async fn get_hpa_status(&self, name: &str, namespace: Option<&str>) -> Result<Option<HpaStatus>> {
        let hpas: Api<HorizontalPodAutoscaler> = self.api(self.ns(namespace));
        Ok(fetch(&hpas, name, "get_hpa")
            .await?
            .map(|hpa| status::to_hpa_status(&hpa)))
    }

    async fn delete_hpa(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        let hpas: Api<HorizontalPodAutoscaler> = self.api(self.ns(namespace));
        remove(&hpas, name, "delete_hpa").await
    }
}

#[async_trait]
impl NetworkPolicyCapable for KubernetesAdapter {
    async fn create_network_policy(&self, policy: &NetworkPolicyConfig) -> Result<()> {
        let namespace = self.ns(policy.namespace.as_deref());
        let policies: Api<NetworkPolicy> = self.api(namespace);
        upsert(
            &policies,
            &policy.name,
            manifests::network_policy(policy, namespace),
            "apply_network_policy",
        )
        .await?;
        info!(policy = %policy.name, namespace = %namespace, "applied network policy");
        Ok(())
    }

    async fn get_network_policy(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<NetworkPolicyConfig>> {
        let policies: Api<NetworkPolicy> = self.api(self.ns(namespace));
        Ok(fetch(&policies, name, "get_network_policy")
            .await?
            .map(|policy| status::to_network_policy(&policy, name)))
    }

    async fn delete_network_policy(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        let policies: Api<NetworkPolicy> = self.api(self.ns(namespace));
        remove(&policies, name, "delete_network_policy").await
    }
}

#[async_trait]
impl CustomResourceCapable for KubernetesAdapter {
    async fn create_custom_resource(&self, resource: &CustomResource) -> Result<CustomResource> {
        self.apply_custom(resource).await
    }

    async fn get_custom_resource(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<CustomResource>> {
        let resource = probe::custom_resource(api_version, kind);
        let api = self.dynamic(self.ns(namespace), &resource);
        Ok(fetch(&api, name, "get_custom_resource")
            .await?
            .map(|object| status::to_custom_resource(&object, &resource)))
    }

    async fn delete_custom_resource(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let api = self.dynamic(self.ns(namespace), &probe::custom_resource(api_version, kind));
        remove(&api, name, "delete_custom_resource").await
    }
}

#[async_trait]
impl NamespaceCapable for KubernetesAdapter {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if fetch(&namespaces, namespace, "get_namespace").await?.is_some() {
            return Ok(());
        }
        match namespaces
            .create(&PostParams::default(), &manifests::namespace(namespace))
            .await
        {
            Ok(_) => {
                info!(namespace, "created namespace");
                Ok(())
            }
            Err(err) => {
                let err = OrchestratorError::kube("create_namespace", err);
                if err.is_conflict() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .map_err(|err| OrchestratorError::kube("list_namespaces", err))?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|namespace| namespace.metadata.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{supports_hpa, supports_namespaces};
    use common::api::{DeploymentStatus, PdbConfig, Port, Protocol};
    use httpmock::prelude::*;
    use kube::Config;
    use serde_json::Value;

    const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/apps/deployments";
    const ROUTES: &str = "/apis/traefik.io/v1alpha1/namespaces/apps/ingressroutes";

    fn adapter(server: &MockServer) -> KubernetesAdapter {
        let url = server.base_url().parse().expect("mock url");
        let client = Client::try_from(Config::new(url)).expect("client");
        KubernetesAdapter::from_client(client, "apps")
    }

    fn list(items: Vec<Value>) -> Value {
        json!({ "apiVersion": "v1", "kind": "List", "metadata": {}, "items": items })
    }

    fn not_found(message: &str) -> Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": message,
            "reason": "NotFound",
            "code": 404
        })
    }

    fn failure(code: u16, reason: &str) -> Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code
        })
    }

    fn success() -> Value {
        json!({ "kind": "Status", "apiVersion": "v1", "metadata": {}, "status": "Success" })
    }

    fn deployment_json(replicas: i32, available: i32) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "apps",
                "resourceVersion": "5",
                "creationTimestamp": "2024-05-01T10:00:00Z"
            },
            "spec": {
                "replicas": replicas,
                "selector": { "matchLabels": { "app": "web" } },
                "template": {
                    "metadata": { "labels": { "app": "web" } },
                    "spec": { "containers": [{ "name": "web", "image": "nginx:1.25" }] }
                }
            },
            "status": {
                "replicas": replicas,
                "availableReplicas": available,
                "updatedReplicas": replicas,
                "readyReplicas": available
            }
        })
    }

    fn pod_json(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": "apps", "labels": { "app": "web" } }
        })
    }

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            replicas: 2,
            ports: vec![Port {
                container_port: 8080,
                protocol: Protocol::Tcp,
                published_port: None,
                publish_mode: Default::default(),
            }],
            ..DeploymentConfig::new("web", "nginx:1.25")
        }
    }

    #[tokio::test]
    async fn exposes_every_capability() {
        let server = MockServer::start_async().await;
        let adapter = adapter(&server);
        assert!(supports_hpa(&adapter));
        assert!(supports_namespaces(&adapter));
        assert!(adapter.as_custom_resources().is_some());
        assert_eq!(adapter.orchestrator_type(), OrchestratorType::Kubernetes);
    }

    #[tokio::test]
    async fn detect_reads_default_namespace() {
        let server = MockServer::start_async().await;
        let adapter = adapter(&server);
        assert_eq!(adapter.detect().await, OrchestratorType::Swarm);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/namespaces/default");
                then.status(200).json_body(json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": "default" }
                }));
            })
            .await;
        assert_eq!(adapter.detect().await, OrchestratorType::Kubernetes);
    }

    #[tokio::test]
    async fn health_counts_ready_nodes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/version");
                then.status(200)
                    .json_body(json!({ "major": "1", "minor": "30", "gitVersion": "v1.30.2" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/nodes");
                then.status(200).json_body(list(vec![
                    json!({
                        "metadata": { "name": "n1" },
                        "status": { "conditions": [{ "type": "Ready", "status": "True" }] }
                    }),
                    json!({
                        "metadata": { "name": "n2" },
                        "status": { "conditions": [{ "type": "Ready", "status": "False" }] }
                    }),
                ]));
            })
            .await;

        let adapter = adapter(&server);
        let health = adapter.health_check().await;
        assert!(health.healthy);
        assert_eq!(health.message, "Kubernetes cluster is healthy with 1 ready nodes");
        let details = health.details.expect("details");
        assert_eq!(details.version.as_deref(), Some("1.30"));
        assert_eq!(details.nodes, Some(1));
        assert_eq!(adapter.get_version().await.expect("version"), "1.30");
    }

    #[tokio::test]
    async fn health_reports_unreachable_api() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/version");
                then.status(403).json_body(failure(403, "Forbidden"));
            })
            .await;
        let health = adapter(&server).health_check().await;
        assert!(!health.healthy);
        assert!(
            health.message.starts_with("Failed to connect to Kubernetes:"),
            "{}",
            health.message
        );
    }

    #[tokio::test]
    async fn get_deployment_maps_status_and_404() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{DEPLOYMENTS}/web"));
                then.status(200).json_body(deployment_json(3, 1));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{DEPLOYMENTS}/ghost"));
                then.status(404)
                    .json_body(not_found("deployments.apps \"ghost\" not found"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{DEPLOYMENTS}/broken"));
                then.status(500).json_body(failure(500, "InternalError"));
            })
            .await;

        let adapter = adapter(&server);
        let deployment = adapter
            .get_deployment("web", None)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(deployment.status, DeploymentStatus::Scaling);
        assert_eq!(deployment.image, "nginx:1.25");

        assert!(adapter.get_deployment("ghost", None).await.expect("get").is_none());
        assert!(adapter.get_deployment("broken", Some("apps")).await.is_err());
    }

    #[tokio::test]
    async fn deploy_creates_missing_objects_then_rereads_the_deployment() {
        let server = MockServer::start_async().await;
        let namespace = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/namespaces/apps");
                then.status(200).json_body(json!({ "metadata": { "name": "apps" } }));
            })
            .await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{DEPLOYMENTS}/web"));
                then.status(404).json_body(not_found("deployments.apps \"web\" not found"));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(DEPLOYMENTS)
                    .body_includes("\"dokploy.managed\":\"true\"")
                    .body_includes("\"image\":\"nginx:1.25\"");
                then.status(201).json_body(deployment_json(2, 0));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/namespaces/apps/services/web");
                then.status(404).json_body(not_found("services \"web\" not found"));
            })
            .await;
        let service = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/namespaces/apps/services")
                    .body_includes("\"name\":\"port-8080\"");
                then.status(201).json_body(json!({
                    "metadata": { "name": "web", "namespace": "apps" },
                    "spec": { "type": "ClusterIP", "clusterIP": "10.96.0.10" }
                }));
            })
            .await;
        let route = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(ROUTES)
                    .body_includes("Host(`app.example.com`)");
                then.status(201).json_body(json!({
                    "apiVersion": "traefik.io/v1alpha1",
                    "kind": "IngressRoute",
                    "metadata": { "name": "web-ingress", "namespace": "apps" },
                    "spec": {
                        "routes": [{
                            "match": "Host(`app.example.com`)",
                            "services": [{ "name": "web", "port": 8080 }]
                        }],
                        "tls": { "certResolver": "letsencrypt" }
                    }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/apis/autoscaling/v2/namespaces/apps/horizontalpodautoscalers/web-hpa");
                then.status(404).json_body(not_found("horizontalpodautoscalers \"web-hpa\" not found"));
            })
            .await;
        let hpa = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/apis/autoscaling/v2/namespaces/apps/horizontalpodautoscalers")
                    .body_includes("\"maxReplicas\":5");
                then.status(201).json_body(json!({
                    "metadata": { "name": "web-hpa", "namespace": "apps" },
                    "spec": {
                        "maxReplicas": 5,
                        "scaleTargetRef": { "kind": "Deployment", "name": "web" }
                    }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/apis/policy/v1/namespaces/apps/poddisruptionbudgets/web-pdb");
                then.status(404).json_body(not_found("poddisruptionbudgets \"web-pdb\" not found"));
            })
            .await;
        let pdb = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/apis/policy/v1/namespaces/apps/poddisruptionbudgets")
                    .body_includes("\"minAvailable\":1");
                then.status(201).json_body(json!({
                    "metadata": { "name": "web-pdb", "namespace": "apps" }
                }));
            })
            .await;

        let mut config = config();
        config.domain = Some("app.example.com".into());
        config.ssl = true;
        config.hpa = Some(HpaConfig {
            enabled: true,
            name: None,
            namespace: None,
            target_name: String::new(),
            min_replicas: 2,
            max_replicas: 5,
            target_cpu: Some(70),
            target_memory: None,
            custom_metrics: Vec::new(),
            behavior: None,
        });
        config.pdb = Some(PdbConfig {
            min_available: Some(1),
            max_unavailable: None,
        });

        // The API server never serves the created object back, so the final
        // read after the dependents are applied surfaces as not found.
        let err = adapter(&server)
            .deploy_application(&config)
            .await
            .expect_err("deployment missing on re-read");
        assert!(
            matches!(err, OrchestratorError::NotFound { kind: "deployment", ref name } if name == "web"),
            "{err}"
        );

        namespace.assert_async().await;
        create.assert_async().await;
        service.assert_async().await;
        route.assert_async().await;
        hpa.assert_async().await;
        pdb.assert_async().await;
        assert_eq!(lookup.hits_async().await, 2);
    }

    #[tokio::test]
    async fn deploy_replaces_existing_objects_keeping_server_fields() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/namespaces/apps");
                then.status(404).json_body(not_found("namespaces \"apps\" not found"));
            })
            .await;
        let namespace = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/namespaces")
                    .body_includes("\"dokploy.managed\":\"true\"");
                then.status(201).json_body(json!({ "metadata": { "name": "apps" } }));
            })
            .await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{DEPLOYMENTS}/web"));
                then.status(200).json_body(deployment_json(2, 2));
            })
            .await;
        let replace = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path(format!("{DEPLOYMENTS}/web"))
                    .body_includes("\"resourceVersion\":\"5\"");
                then.status(200).json_body(deployment_json(2, 0));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/namespaces/apps/services/web");
                then.status(200).json_body(json!({
                    "metadata": { "name": "web", "resourceVersion": "9" },
                    "spec": { "type": "ClusterIP", "clusterIP": "10.96.0.10" }
                }));
            })
            .await;
        let service = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/api/v1/namespaces/apps/services/web")
                    .body_includes("\"clusterIP\":\"10.96.0.10\"")
                    .body_includes("\"resourceVersion\":\"9\"");
                then.status(200).json_body(json!({
                    "metadata": { "name": "web", "resourceVersion": "10" },
                    "spec": { "type": "ClusterIP", "clusterIP": "10.96.0.10" }
                }));
            })
            .await;

        let deployment = adapter(&server)
            .deploy_application(&config())
            .await
            .expect("deploy");
        // Status comes from the final read, not the replace response.
        assert_eq!(deployment.status, DeploymentStatus::Running);
        namespace.assert_async().await;
        replace.assert_async().await;
        service.assert_async().await;
        assert_eq!(lookup.hits_async().await, 2);
    }

    #[tokio::test]
    async fn scale_patches_scale_subresource() {
        let server = MockServer::start_async().await;
        let scale = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path(format!("{DEPLOYMENTS}/web/scale"))
                    .header("content-type", "application/merge-patch+json")
                    .body_includes("\"replicas\":4");
                then.status(200).json_body(json!({
                    "apiVersion": "autoscaling/v1",
                    "kind": "Scale",
                    "metadata": { "name": "web" },
                    "spec": { "replicas": 4 }
                }));
            })
            .await;

        adapter(&server)
            .scale_application("web", 4, None)
            .await
            .expect("scale");
        scale.assert_async().await;
    }

    #[tokio::test]
    async fn rollback_and_restart_send_merge_patches() {
        let server = MockServer::start_async().await;
        let rollback = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path(format!("{DEPLOYMENTS}/web"))
                    .body_includes("\"rollbackTo\":{\"revision\":0}");
                then.status(200).json_body(deployment_json(2, 2));
            })
            .await;
        let restart = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path(format!("{DEPLOYMENTS}/web"))
                    .body_includes("kubectl.kubernetes.io/restartedAt");
                then.status(200).json_body(deployment_json(2, 2));
            })
            .await;

        let adapter = adapter(&server);
        adapter
            .rollback_application("web", None, None)
            .await
            .expect("rollback");
        adapter
            .restart_application("web", None)
            .await
            .expect("restart");
        rollback.assert_async().await;
        restart.assert_async().await;
    }

    #[tokio::test]
    async fn update_rewrites_first_container() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{DEPLOYMENTS}/web"));
                then.status(200).json_body(deployment_json(2, 2));
            })
            .await;
        let replace = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path(format!("{DEPLOYMENTS}/web"))
                    .body_includes("\"image\":\"nginx:1.27\"");
                then.status(200).json_body(deployment_json(2, 2));
            })
            .await;

        let patch = DeploymentPatch {
            image: Some("nginx:1.27".into()),
            ..Default::default()
        };
        adapter(&server)
            .update_application("web", &patch, None)
            .await
            .expect("update");
        replace.assert_async().await;
    }

    #[tokio::test]
    async fn update_of_missing_deployment_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{DEPLOYMENTS}/ghost"));
                then.status(404).json_body(not_found("deployments.apps \"ghost\" not found"));
            })
            .await;
        let err = adapter(&server)
            .update_application("ghost", &DeploymentPatch::default(), None)
            .await
            .expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_skips_missing_dependents_and_removes_deployment_last() {
        let server = MockServer::start_async().await;
        let hpa = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/apis/autoscaling/v2/namespaces/apps/horizontalpodautoscalers/web-hpa");
                then.status(404).json_body(not_found("horizontalpodautoscalers \"web-hpa\" not found"));
            })
            .await;
        let service = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/api/v1/namespaces/apps/services/web");
                then.status(200).json_body(success());
            })
            .await;
        let route = server
            .mock_async(|when, then| {
                when.method(DELETE).path(format!("{ROUTES}/web-ingress"));
                then.status(404).json_body(not_found("ingressroutes \"web-ingress\" not found"));
            })
            .await;
        let native = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/apis/networking.k8s.io/v1/namespaces/apps/ingresses/web-ingress");
                then.status(404).json_body(not_found("ingresses \"web-ingress\" not found"));
            })
            .await;
        let policy = server
            .mock_async(|when, then| {
                when.method(DELETE).path(
                    "/apis/networking.k8s.io/v1/namespaces/apps/networkpolicies/web-network-policy",
                );
                then.status(403).json_body(failure(403, "Forbidden"));
            })
            .await;
        let deployment = server
            .mock_async(|when, then| {
                when.method(DELETE).path(format!("{DEPLOYMENTS}/web"));
                then.status(200).json_body(success());
            })
            .await;

        adapter(&server)
            .delete_application("web", None)
            .await
            .expect("delete");
        hpa.assert_async().await;
        service.assert_async().await;
        route.assert_async().await;
        native.assert_async().await;
        policy.assert_async().await;
        deployment.assert_async().await;
    }

    #[tokio::test]
    async fn delete_propagates_deployment_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path(format!("{DEPLOYMENTS}/web"));
                then.status(404).json_body(not_found("deployments.apps \"web\" not found"));
            })
            .await;
        let err = adapter(&server)
            .delete_application("web", None)
            .await
            .expect_err("deployment missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_deployments_passes_label_selector() {
        let server = MockServer::start_async().await;
        let listing = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(DEPLOYMENTS)
                    .query_param("labelSelector", "app=web");
                then.status(200).json_body(list(vec![deployment_json(1, 1)]));
            })
            .await;

        let deployments = adapter(&server)
            .list_deployments(None, Some("app=web"))
            .await
            .expect("list");
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].status, DeploymentStatus::Running);
        listing.assert_async().await;
    }

    #[tokio::test]
    async fn get_ingress_falls_back_to_native_ingress() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{ROUTES}/legacy-ingress"));
                then.status(404)
                    .json_body(not_found("the server could not find the requested resource"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/apis/networking.k8s.io/v1/namespaces/apps/ingresses/legacy");
                then.status(200).json_body(json!({
                    "metadata": { "name": "legacy", "namespace": "apps" },
                    "spec": {
                        "tls": [{ "hosts": ["old.example.com"] }],
                        "rules": [{
                            "host": "old.example.com",
                            "http": { "paths": [{
                                "path": "/",
                                "pathType": "Prefix",
                                "backend": { "service": { "name": "legacy", "port": { "number": 80 } } }
                            }] }
                        }]
                    }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{ROUTES}/ghost-ingress"));
                then.status(404).json_body(not_found("ingressroutes \"ghost-ingress\" not found"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/apis/networking.k8s.io/v1/namespaces/apps/ingresses/ghost");
                then.status(404).json_body(not_found("ingresses \"ghost\" not found"));
            })
            .await;

        let adapter = adapter(&server);
        let ingress = adapter
            .get_ingress("legacy", None)
            .await
            .expect("get")
            .expect("native ingress");
        assert_eq!(ingress.hosts, vec!["old.example.com"]);
        assert!(ingress.tls);
        assert!(adapter.get_ingress("ghost", None).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn get_ingress_reads_route_hosts() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{ROUTES}/web-ingress"));
                then.status(200).json_body(json!({
                    "apiVersion": "traefik.io/v1alpha1",
                    "kind": "IngressRoute",
                    "metadata": { "name": "web-ingress", "namespace": "apps" },
                    "spec": {
                        "routes": [{
                            "match": "Host(`a.example.com`) || Host(`b.example.com`)",
                            "services": [{ "name": "web", "port": 3000 }]
                        }]
                    }
                }));
            })
            .await;

        let ingress = adapter(&server)
            .get_ingress("web", None)
            .await
            .expect("get")
            .expect("route");
        assert_eq!(ingress.name, "web-ingress");
        assert_eq!(ingress.hosts, vec!["a.example.com", "b.example.com"]);
        assert!(!ingress.tls);
        assert_eq!(ingress.rules[1].paths[0].service_port, 3000);
    }

    #[tokio::test]
    async fn custom_resource_conflict_replaces_with_current_version() {
        let server = MockServer::start_async().await;
        let path = "/apis/example.com/v1/namespaces/apps/widgets";
        server
            .mock_async(|when, then| {
                when.method(POST).path(path);
                then.status(409).json_body(failure(409, "AlreadyExists"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{path}/blue"));
                then.status(200).json_body(json!({
                    "apiVersion": "example.com/v1",
                    "kind": "Widget",
                    "metadata": { "name": "blue", "namespace": "apps", "resourceVersion": "42" },
                    "spec": { "size": 1 }
                }));
            })
            .await;
        let replace = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path(format!("{path}/blue"))
                    .body_includes("\"resourceVersion\":\"42\"")
                    .body_includes("\"size\":3");
                then.status(200).json_body(json!({
                    "apiVersion": "example.com/v1",
                    "kind": "Widget",
                    "metadata": { "name": "blue", "namespace": "apps", "resourceVersion": "43" },
                    "spec": { "size": 3 }
                }));
            })
            .await;

        let mut widget = CustomResource::new("example.com/v1", "Widget", "blue");
        widget.spec = json!({ "size": 3 });
        let stored = adapter(&server)
            .create_custom_resource(&widget)
            .await
            .expect("apply");
        assert_eq!(stored.spec["size"], 3);
        assert_eq!(stored.metadata.namespace.as_deref(), Some("apps"));
        replace.assert_async().await;
    }

    #[tokio::test]
    async fn metrics_are_none_without_pods() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/namespaces/apps/pods")
                    .query_param("labelSelector", "app=web");
                then.status(200).json_body(list(Vec::new()));
            })
            .await;
        assert!(adapter(&server)
            .get_metrics("web", None)
            .await
            .expect("metrics")
            .is_none());
    }

    #[tokio::test]
    async fn metrics_sum_matching_pod_samples() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/namespaces/apps/pods")
                    .query_param("labelSelector", "app=web");
                then.status(200).json_body(list(vec![pod_json("web-1")]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apis/metrics.k8s.io/v1beta1/namespaces/apps/pods");
                then.status(200).json_body(list(vec![
                    json!({
                        "apiVersion": "metrics.k8s.io/v1beta1",
                        "kind": "PodMetrics",
                        "metadata": { "name": "web-1", "namespace": "apps" },
                        "timestamp": "2024-05-01T10:00:00Z",
                        "containers": [{ "name": "web", "usage": { "cpu": "500m", "memory": "64Mi" } }]
                    }),
                    json!({
                        "apiVersion": "metrics.k8s.io/v1beta1",
                        "kind": "PodMetrics",
                        "metadata": { "name": "other-1", "namespace": "apps" },
                        "containers": [{ "name": "other", "usage": { "cpu": "2", "memory": "1Gi" } }]
                    }),
                ]));
            })
            .await;

        let metrics = adapter(&server)
            .get_metrics("web", None)
            .await
            .expect("metrics")
            .expect("samples");
        assert_eq!(metrics.containers.len(), 1);
        assert_eq!(metrics.total_cpu, "0.500");
        assert_eq!(metrics.total_memory, "64Mi");
    }

    #[tokio::test]
    async fn logs_come_from_first_pod() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/namespaces/apps/pods")
                    .query_param("labelSelector", "app=web");
                then.status(200)
                    .json_body(list(vec![pod_json("web-1"), pod_json("web-2")]));
            })
            .await;
        let logs = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/namespaces/apps/pods/web-1/log")
                    .query_param("tailLines", "20");
                then.status(200).body("GET /\n\nGET /health\n");
            })
            .await;

        let options = LogOptions {
            tail_lines: Some(20),
            ..Default::default()
        };
        let lines = adapter(&server)
            .get_logs("web", &options, None)
            .await
            .expect("logs");
        assert_eq!(lines, vec!["GET /", "GET /health"]);
        logs.assert_async().await;
    }

    #[tokio::test]
    async fn stream_logs_forwards_lines_until_end() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/namespaces/apps/pods")
                    .query_param("labelSelector", "app=web");
                then.status(200).json_body(list(vec![pod_json("web-1")]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/namespaces/apps/pods/web-1/log")
                    .query_param("follow", "true");
                then.status(200).body("first\nsecond\n");
            })
            .await;

        let mut stream = adapter(&server)
            .stream_logs("web", &LogOptions::default(), None)
            .await
            .expect("stream");
        assert_eq!(stream.next_line().await.as_deref(), Some("first"));
        assert_eq!(stream.next_line().await.as_deref(), Some("second"));
        assert_eq!(stream.next_line().await, None);
    }

    #[tokio::test]
    async fn stream_logs_without_pods_ends_immediately() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/namespaces/apps/pods");
                then.status(200).json_body(list(Vec::new()));
            })
            .await;
        let mut stream = adapter(&server)
            .stream_logs("web", &LogOptions::default(), None)
            .await
            .expect("stream");
        assert_eq!(stream.next_line().await, None);
    }

    #[tokio::test]
    async fn events_filter_by_involved_object() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/namespaces/apps/events")
                    .query_param("fieldSelector", "involvedObject.name=web");
                then.status(200).json_body(list(vec![json!({
                    "metadata": { "name": "web.1" },
                    "involvedObject": { "kind": "Deployment", "name": "web" },
                    "type": "Normal",
                    "reason": "ScalingReplicaSet",
                    "message": "Scaled up replica set web-abc to 2",
                    "count": 1,
                    "lastTimestamp": "2024-05-01T10:00:00Z"
                })]));
            })
            .await;

        let events = adapter(&server).get_events("web", None).await.expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "ScalingReplicaSet");
    }

    #[tokio::test]
    async fn capability_probe_classifies_responses() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!(
                    "/apis/autoscaling/v2/namespaces/apps/horizontalpodautoscalers/{}",
                    probe::PROBE_NAME
                ));
                then.status(404).json_body(not_found(&format!(
                    "horizontalpodautoscalers.autoscaling \"{}\" not found",
                    probe::PROBE_NAME
                )));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!(
                    "/apis/networking.k8s.io/v1/namespaces/apps/networkpolicies/{}",
                    probe::PROBE_NAME
                ));
                then.status(403).json_body(failure(403, "Forbidden"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{ROUTES}/{}", probe::PROBE_NAME));
                then.status(404)
                    .json_body(not_found("the server could not find the requested resource"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apis/metrics.k8s.io/v1beta1/namespaces/apps/pods");
                then.status(200).json_body(list(Vec::new()));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apis/storage.k8s.io/v1/storageclasses");
                then.status(200).json_body(list(vec![
                    json!({ "metadata": { "name": "local-path" }, "provisioner": "rancher.io/local-path" }),
                ]));
            })
            .await;

        let capabilities = adapter(&server).detect_capabilities().await;
        assert!(capabilities.supports_hpa);
        assert!(capabilities.metrics_server_installed);
        assert!(!capabilities.supports_network_policies);
        assert_eq!(capabilities.ingress_controller, None);
        assert_eq!(capabilities.storage_classes, vec!["local-path"]);
        assert!(capabilities.supports_pod_disruption_budget);
    }
}
