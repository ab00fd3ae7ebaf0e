//! Orchestration DTOs shared by the Swarm and Kubernetes adapters.
//!
//! Wire names are camelCase so requests built by dashboard forms or API calls
//! deserialize unchanged from JSON or YAML.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label attached to every object created through the orchestration layer.
pub const MANAGED_LABEL: &str = "dokploy.managed";

/// Orchestrator running on a managed server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorType {
    /// Docker Swarm mode.
    Swarm,
    /// Kubernetes.
    Kubernetes,
}

impl OrchestratorType {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorType::Swarm => "swarm",
            OrchestratorType::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for OrchestratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrchestratorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "swarm" => Ok(OrchestratorType::Swarm),
            "kubernetes" | "k8s" => Ok(OrchestratorType::Kubernetes),
            other => Err(format!("unknown orchestrator type '{other}'")),
        }
    }
}

/// Optional cluster features detected on a Kubernetes server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct K8sCapabilities {
    /// autoscaling/v2 HorizontalPodAutoscaler is served.
    #[serde(rename = "supportsHPA")]
    pub supports_hpa: bool,
    /// networking.k8s.io/v1 NetworkPolicy is served.
    pub supports_network_policies: bool,
    /// metrics.k8s.io answers pod metric listings.
    pub metrics_server_installed: bool,
    /// Detected ingress controller, e.g. `traefik`.
    pub ingress_controller: Option<String>,
    /// Names of the cluster's storage classes.
    #[serde(default)]
    pub storage_classes: Vec<String>,
    /// policy/v1 PodDisruptionBudget is served.
    pub supports_pod_disruption_budget: bool,
}

/// Identity and connection parameters for one managed cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server id; empty for the local server.
    #[serde(default)]
    pub server_id: String,
    /// Display name.
    pub name: String,
    /// Declared or detected orchestrator; `None` means probe on next use.
    #[serde(default)]
    pub orchestrator_type: Option<OrchestratorType>,
    /// SSH host of the server.
    pub ip_address: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// SSH user.
    #[serde(default = "default_ssh_user")]
    pub username: String,
    /// Reference to the stored SSH key.
    #[serde(default)]
    pub ssh_key_id: Option<String>,
    /// Resolved private key location for the SSH key reference.
    #[serde(default)]
    pub ssh_key_path: Option<String>,
    /// Kubeconfig context to select.
    #[serde(default)]
    pub k8s_context: Option<String>,
    /// Default namespace for workloads.
    #[serde(default)]
    pub k8s_namespace: Option<String>,
    /// API server endpoint override.
    #[serde(default)]
    pub k8s_api_endpoint: Option<String>,
    /// Inline kubeconfig, base64 encoded or raw YAML.
    #[serde(default)]
    pub k8s_kubeconfig: Option<String>,
    /// Kubeconfig file path on the control host.
    #[serde(default)]
    pub k8s_kubeconfig_path: Option<String>,
    /// Capabilities recorded by the last probe.
    #[serde(default)]
    pub k8s_capabilities: Option<K8sCapabilities>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl ServerConfig {
    /// Synthetic record for the host running the platform itself.
    pub fn local() -> Self {
        Self {
            server_id: String::new(),
            name: "local".to_string(),
            orchestrator_type: Some(OrchestratorType::Swarm),
            ip_address: "127.0.0.1".to_string(),
            port: default_ssh_port(),
            username: default_ssh_user(),
            ..Default::default()
        }
    }

    /// True for the local server (no server id).
    pub fn is_local(&self) -> bool {
        self.server_id.is_empty()
    }

    /// Key used by the adapter cache: the server id or `local`.
    pub fn cache_key(&self) -> &str {
        if self.is_local() {
            "local"
        } else {
            &self.server_id
        }
    }

    /// True when any Kubernetes connection field is set.
    pub fn has_kubernetes_fields(&self) -> bool {
        self.k8s_kubeconfig.is_some()
            || self.k8s_kubeconfig_path.is_some()
            || self.k8s_api_endpoint.is_some()
    }
}

/// Result of a backend health probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Whether the backend is usable.
    pub healthy: bool,
    /// Human readable summary.
    pub message: String,
    /// Extra detail for healthy backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

impl HealthStatus {
    /// Unhealthy status with a message.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            details: None,
        }
    }
}

/// Detail attached to a [`HealthStatus`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    /// Engine or API server version.
    pub version: Option<String>,
    /// Node count (ready nodes on Kubernetes).
    pub nodes: Option<i64>,
    /// Endpoint that answered.
    pub api_endpoint: Option<String>,
    /// When the check ran.
    pub last_check: Option<DateTime<Utc>>,
}

/// Normalized deployment state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// No replica is running yet.
    Pending,
    /// All desired replicas are available.
    Running,
    /// Fewer replicas are available than desired.
    Scaling,
    /// A rollout is replacing replicas.
    Updating,
    /// The workload cannot become available.
    Failed,
    /// The workload ran to completion.
    Succeeded,
}

impl DeploymentStatus {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Scaling => "scaling",
            DeploymentStatus::Updating => "updating",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Succeeded => "succeeded",
        }
    }
}

/// Transport protocol for ports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP.
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Returns the uppercase Kubernetes representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    /// Parses either case, falling back to TCP.
    pub fn parse_lenient(value: &str) -> Self {
        if value.eq_ignore_ascii_case("udp") {
            Protocol::Udp
        } else {
            Protocol::Tcp
        }
    }
}

/// Swarm port publishing mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Routing mesh.
    #[default]
    Ingress,
    /// Bind on the node running the task.
    Host,
}

/// Container port exposed by a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Port the container listens on.
    pub container_port: u16,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: Protocol,
    /// Port published on the cluster (Swarm).
    #[serde(default)]
    pub published_port: Option<u16>,
    /// Swarm publish mode.
    #[serde(default)]
    pub publish_mode: PublishMode,
}

impl Port {
    /// TCP port with no published mapping.
    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Protocol::Tcp,
            published_port: None,
            publish_mode: PublishMode::Ingress,
        }
    }
}

/// Volume mounted into the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Mount path in the container.
    pub mount_path: String,
    /// PersistentVolumeClaim (Kubernetes) or named volume (Swarm).
    #[serde(default)]
    pub pvc_name: Option<String>,
    /// Host path to bind.
    #[serde(default)]
    pub host_path: Option<String>,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// CPU and memory quantities in Kubernetes notation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU, e.g. `500m` or `1`.
    pub cpu: String,
    /// Memory, e.g. `128Mi`.
    pub memory: String,
}

/// Requests and limits for the workload container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// Reserved resources.
    pub requests: ResourceQuantities,
    /// Hard limits.
    pub limits: ResourceQuantities,
}

/// URI scheme for HTTP probes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTPS.
    Https,
}

impl Scheme {
    /// Returns the uppercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "HTTP",
            Scheme::Https => "HTTPS",
        }
    }
}

/// HTTP GET probe target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpGetAction {
    /// Request path.
    pub path: String,
    /// Container port.
    pub port: u16,
    /// Scheme, HTTP when unset.
    #[serde(default)]
    pub scheme: Option<Scheme>,
}

/// TCP socket probe target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TcpSocketAction {
    /// Container port.
    pub port: u16,
}

/// Command probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecAction {
    /// Command and arguments.
    pub command: Vec<String>,
}

/// Health, readiness, liveness or startup probe. Timings are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    /// HTTP GET check.
    pub http_get: Option<HttpGetAction>,
    /// TCP connect check.
    pub tcp_socket: Option<TcpSocketAction>,
    /// Command check.
    pub exec: Option<ExecAction>,
    /// Delay before the first check.
    pub initial_delay_seconds: i32,
    /// Interval between checks.
    pub period_seconds: i32,
    /// Timeout of one check.
    pub timeout_seconds: i32,
    /// Failures before the container is considered unhealthy.
    pub failure_threshold: i32,
    /// Successes before the container is considered healthy again.
    pub success_threshold: Option<i32>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_get: None,
            tcp_socket: None,
            exec: None,
            initial_delay_seconds: 0,
            period_seconds: 10,
            timeout_seconds: 1,
            failure_threshold: 3,
            success_threshold: None,
        }
    }
}

/// Integer or percentage string, as used by surge and port fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IntOrString {
    /// Absolute number.
    Int(i32),
    /// String form, e.g. `25%` or a named port.
    String(String),
}

/// Rollout strategy kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyType {
    /// Rolling update.
    Rolling,
    /// Stop everything, then start.
    Recreate,
    /// Blue/green (treated as recreate by the backends).
    BlueGreen,
    /// Canary (treated as recreate by the backends).
    Canary,
}

/// Rolling update bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateConfig {
    /// Extra replicas allowed during the rollout.
    pub max_surge: IntOrString,
    /// Replicas allowed to be unavailable during the rollout.
    pub max_unavailable: IntOrString,
}

/// Update strategy for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStrategy {
    /// Strategy kind.
    #[serde(rename = "type")]
    pub kind: StrategyType,
    /// Bounds for rolling updates.
    #[serde(default)]
    pub rolling_update: Option<RollingUpdateConfig>,
}

/// PodDisruptionBudget request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PdbConfig {
    /// Minimum available pods.
    #[serde(default)]
    pub min_available: Option<i32>,
    /// Maximum unavailable pods.
    #[serde(default)]
    pub max_unavailable: Option<i32>,
}

/// Declarative deployment request accepted by both backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Workload name; also the Swarm service and Kubernetes Deployment name.
    pub name: String,
    /// Kubernetes namespace; ignored by Swarm.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Container image.
    pub image: String,
    /// Desired replica count.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Exposed ports.
    #[serde(default)]
    pub ports: Vec<Port>,
    /// Volume mounts.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Requests and limits.
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    /// Extra labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations (Kubernetes).
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Entrypoint override.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Arguments override.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Swarm health check.
    #[serde(default)]
    pub health_check: Option<ProbeConfig>,
    /// Kubernetes readiness probe.
    #[serde(default)]
    pub readiness_probe: Option<ProbeConfig>,
    /// Kubernetes liveness probe.
    #[serde(default)]
    pub liveness_probe: Option<ProbeConfig>,
    /// Kubernetes startup probe.
    #[serde(default)]
    pub startup_probe: Option<ProbeConfig>,
    /// Update strategy.
    #[serde(default)]
    pub strategy: Option<DeploymentStrategy>,
    /// Public domain routed to the first port.
    #[serde(default)]
    pub domain: Option<String>,
    /// Request a TLS certificate for the domain.
    #[serde(default)]
    pub ssl: bool,
    /// Autoscaler (Kubernetes).
    #[serde(default)]
    pub hpa: Option<HpaConfig>,
    /// Network policy (Kubernetes).
    #[serde(default)]
    pub network_policy: Option<NetworkPolicyConfig>,
    /// Service account (Kubernetes).
    #[serde(default)]
    pub service_account: Option<String>,
    /// Disruption budget (Kubernetes).
    #[serde(default)]
    pub pdb: Option<PdbConfig>,
}

fn default_replicas() -> u32 {
    1
}

impl DeploymentConfig {
    /// Minimal single-replica request.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            image: image.into(),
            replicas: default_replicas(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            resources: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            command: None,
            args: None,
            health_check: None,
            readiness_probe: None,
            liveness_probe: None,
            startup_probe: None,
            strategy: None,
            domain: None,
            ssl: false,
            hpa: None,
            network_policy: None,
            service_account: None,
            pdb: None,
        }
    }
}

/// Partial update of a running deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPatch {
    /// New image.
    #[serde(default)]
    pub image: Option<String>,
    /// Replacement environment.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Replacement command.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Replacement args.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// New replica count.
    #[serde(default)]
    pub replicas: Option<u32>,
}

/// Replica counters of a deployment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaCounts {
    /// Target count.
    pub desired: u32,
    /// Running and ready.
    pub ready: u32,
    /// Serving traffic.
    pub available: u32,
    /// Reported unavailable (Kubernetes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<u32>,
}

/// Tri-state condition value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold.
    False,
    /// Unknown.
    Unknown,
}

impl ConditionStatus {
    /// Parses the Kubernetes string form.
    pub fn parse(value: &str) -> Self {
        match value {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// Condition reported for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCondition {
    /// Condition type, e.g. `Available`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Condition value.
    pub status: ConditionStatus,
    /// Machine readable reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Human readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Last transition time.
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Normalized deployment read back from a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Workload name.
    pub name: String,
    /// Namespace (Kubernetes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Derived status.
    pub status: DeploymentStatus,
    /// Replica counters.
    pub replicas: ReplicaCounts,
    /// Image of the first container.
    pub image: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Backend conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DeploymentCondition>,
}

/// Kind of service endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceType {
    /// Cluster-internal virtual IP.
    #[default]
    #[serde(rename = "ClusterIP")]
    ClusterIp,
    /// Port on every node.
    NodePort,
    /// External load balancer.
    LoadBalancer,
}

impl ServiceType {
    /// Returns the Kubernetes representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterIp => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }

    /// Parses the Kubernetes representation, defaulting to ClusterIP.
    pub fn parse(value: &str) -> Self {
        match value {
            "NodePort" => ServiceType::NodePort,
            "LoadBalancer" => ServiceType::LoadBalancer,
            _ => ServiceType::ClusterIp,
        }
    }
}

/// One port of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name.
    #[serde(default)]
    pub name: Option<String>,
    /// Service port.
    pub port: u16,
    /// Container port.
    pub target_port: u16,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: Protocol,
    /// Node port (NodePort services).
    #[serde(default)]
    pub node_port: Option<u16>,
}

/// Service request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service name.
    pub name: String,
    /// Namespace (Kubernetes).
    #[serde(default)]
    pub namespace: Option<String>,
    /// Pod selector.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Ports.
    pub ports: Vec<ServicePort>,
    /// Service type, ClusterIP when unset.
    #[serde(default, rename = "type")]
    pub service_type: Option<ServiceType>,
}

/// Partial update of a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePatch {
    /// Replacement selector.
    #[serde(default)]
    pub selector: Option<BTreeMap<String, String>>,
    /// Replacement ports.
    #[serde(default)]
    pub ports: Option<Vec<ServicePort>>,
    /// Replacement type.
    #[serde(default, rename = "type")]
    pub service_type: Option<ServiceType>,
}

/// Normalized service read back from a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service name.
    pub name: String,
    /// Namespace (Kubernetes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Service type.
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Cluster IP.
    #[serde(default, rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    /// Load-balancer addresses.
    #[serde(default, rename = "externalIP", skip_serializing_if = "Vec::is_empty")]
    pub external_ips: Vec<String>,
    /// Ports.
    pub ports: Vec<ServicePort>,
    /// Pod selector.
    pub selector: BTreeMap<String, String>,
}

/// Routing request for a public domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Route name.
    pub name: String,
    /// Namespace (Kubernetes).
    #[serde(default)]
    pub namespace: Option<String>,
    /// Host to match.
    pub domain: String,
    /// Backend service.
    pub service_name: String,
    /// Backend port.
    pub service_port: u16,
    /// Terminate TLS.
    #[serde(default)]
    pub ssl: bool,
    /// ACME resolver, `letsencrypt` when unset.
    #[serde(default)]
    pub cert_resolver: Option<String>,
    /// Middleware names to attach.
    #[serde(default)]
    pub middlewares: Vec<String>,
    /// Path prefix to match.
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Strip the prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,
}

/// Path matching mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PathType {
    /// Prefix match.
    #[default]
    Prefix,
    /// Exact match.
    Exact,
    /// Controller specific.
    ImplementationSpecific,
}

impl PathType {
    /// Parses the Kubernetes representation, defaulting to Prefix.
    pub fn parse(value: &str) -> Self {
        match value {
            "Exact" => PathType::Exact,
            "ImplementationSpecific" => PathType::ImplementationSpecific,
            _ => PathType::Prefix,
        }
    }
}

/// Path routed to a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressPath {
    /// Path.
    pub path: String,
    /// Matching mode.
    pub path_type: PathType,
    /// Backend service.
    pub service_name: String,
    /// Backend port.
    pub service_port: u16,
}

/// Host rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngressRule {
    /// Host.
    pub host: String,
    /// Routed paths.
    pub paths: Vec<IngressPath>,
}

/// Normalized ingress read back from a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingress {
    /// Route name.
    pub name: String,
    /// Namespace (Kubernetes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Matched hosts.
    pub hosts: Vec<String>,
    /// TLS enabled.
    pub tls: bool,
    /// Rules.
    pub rules: Vec<IngressRule>,
}

/// Source of a custom autoscaling metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CustomMetricType {
    /// Container resource.
    Resource,
    /// Per-pod metric.
    Pods,
    /// Metric outside the cluster.
    External,
}

/// Target value kind of a metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetricTargetType {
    /// Percentage of requests.
    Utilization,
    /// Absolute value.
    Value,
    /// Average across pods.
    AverageValue,
}

impl MetricTargetType {
    /// Returns the Kubernetes representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricTargetType::Utilization => "Utilization",
            MetricTargetType::Value => "Value",
            MetricTargetType::AverageValue => "AverageValue",
        }
    }
}

/// Target of a custom metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricTarget {
    /// Target kind.
    #[serde(rename = "type")]
    pub kind: MetricTargetType,
    /// Absolute value.
    #[serde(default)]
    pub value: Option<String>,
    /// Average value.
    #[serde(default)]
    pub average_value: Option<String>,
    /// Average utilization percentage.
    #[serde(default)]
    pub average_utilization: Option<i32>,
}

/// Additional autoscaling metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomMetric {
    /// Metric name.
    pub name: String,
    /// Metric source.
    #[serde(rename = "type")]
    pub kind: CustomMetricType,
    /// Target.
    pub target: MetricTarget,
}

/// Scaling policy unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScalingPolicyType {
    /// Absolute pod count.
    Pods,
    /// Percentage of current replicas.
    Percent,
}

impl ScalingPolicyType {
    /// Returns the Kubernetes representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingPolicyType::Pods => "Pods",
            ScalingPolicyType::Percent => "Percent",
        }
    }
}

/// One scaling step limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    /// Policy unit.
    #[serde(rename = "type")]
    pub kind: ScalingPolicyType,
    /// Amount per period.
    pub value: i32,
    /// Period length.
    pub period_seconds: i32,
}

/// Scaling rules for one direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRules {
    /// Stabilization window.
    #[serde(default)]
    pub stabilization_window_seconds: Option<i32>,
    /// Policies.
    #[serde(default)]
    pub policies: Vec<ScalingPolicy>,
}

/// Autoscaler behavior for both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HpaBehavior {
    /// Scale-down rules.
    #[serde(default)]
    pub scale_down: Option<ScalingRules>,
    /// Scale-up rules.
    #[serde(default)]
    pub scale_up: Option<ScalingRules>,
}

/// Horizontal autoscaler request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HpaConfig {
    /// Whether the autoscaler should exist.
    #[serde(default)]
    pub enabled: bool,
    /// Autoscaler name, `<target>-hpa` when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Deployment to scale.
    #[serde(default)]
    pub target_name: String,
    /// Lower bound.
    #[serde(default = "default_replicas_i32")]
    pub min_replicas: i32,
    /// Upper bound.
    pub max_replicas: i32,
    /// CPU utilization target percentage.
    #[serde(default, rename = "targetCPU")]
    pub target_cpu: Option<i32>,
    /// Memory utilization target percentage.
    #[serde(default)]
    pub target_memory: Option<i32>,
    /// Extra metrics.
    #[serde(default)]
    pub custom_metrics: Vec<CustomMetric>,
    /// Behavior, an availability-biased default when unset.
    #[serde(default)]
    pub behavior: Option<HpaBehavior>,
}

fn default_replicas_i32() -> i32 {
    1
}

/// Observed value of one autoscaling metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HpaMetricStatus {
    /// Metric name.
    pub name: String,
    /// Current value.
    pub current_value: String,
    /// Target value.
    pub target_value: String,
}

/// Autoscaler condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HpaCondition {
    /// Condition type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Condition value.
    pub status: ConditionStatus,
    /// Reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Autoscaler state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HpaStatus {
    /// Current replicas.
    pub current_replicas: i32,
    /// Desired replicas.
    pub desired_replicas: i32,
    /// Metrics.
    #[serde(default)]
    pub current_metrics: Vec<HpaMetricStatus>,
    /// Conditions.
    #[serde(default)]
    pub conditions: Vec<HpaCondition>,
    /// Last scale event.
    #[serde(default)]
    pub last_scale_time: Option<DateTime<Utc>>,
}

/// Direction governed by a network policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyType {
    /// Incoming traffic.
    Ingress,
    /// Outgoing traffic.
    Egress,
}

impl PolicyType {
    /// Returns the Kubernetes representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Ingress => "Ingress",
            PolicyType::Egress => "Egress",
        }
    }
}

/// CIDR block peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpBlock {
    /// Allowed CIDR.
    pub cidr: String,
    /// Excluded CIDRs.
    #[serde(default)]
    pub except: Vec<String>,
}

/// Peer of a network policy rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyPeer {
    /// Pod labels.
    #[serde(default)]
    pub pod_selector: Option<BTreeMap<String, String>>,
    /// Namespace labels.
    #[serde(default)]
    pub namespace_selector: Option<BTreeMap<String, String>>,
    /// CIDR block.
    #[serde(default)]
    pub ip_block: Option<IpBlock>,
}

/// Port of a network policy rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkPolicyPort {
    /// Protocol.
    #[serde(default)]
    pub protocol: Option<Protocol>,
    /// Number or name.
    #[serde(default)]
    pub port: Option<IntOrString>,
}

/// Ingress or egress rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkPolicyRule {
    /// Sources (ingress rules).
    #[serde(default)]
    pub from: Vec<NetworkPolicyPeer>,
    /// Destinations (egress rules).
    #[serde(default)]
    pub to: Vec<NetworkPolicyPeer>,
    /// Ports.
    #[serde(default)]
    pub ports: Vec<NetworkPolicyPort>,
}

/// Network policy request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyConfig {
    /// Policy name.
    pub name: String,
    /// Namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Selected pods.
    #[serde(default)]
    pub pod_selector: BTreeMap<String, String>,
    /// Governed directions.
    #[serde(default)]
    pub policy_types: Vec<PolicyType>,
    /// Ingress rules.
    #[serde(default)]
    pub ingress: Vec<NetworkPolicyRule>,
    /// Egress rules.
    #[serde(default)]
    pub egress: Vec<NetworkPolicyRule>,
}

/// CPU usage of a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuUsage {
    /// Backend formatted usage, e.g. `100m` or `12.50%`.
    pub usage: String,
    /// Usage in nanocores.
    #[serde(default)]
    pub usage_nano_cores: Option<u64>,
}

/// Memory usage of a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Backend formatted usage, e.g. `256Mi`.
    pub usage: String,
    /// Usage in bytes.
    #[serde(default)]
    pub usage_bytes: Option<u64>,
    /// Working set.
    #[serde(default)]
    pub working_set: Option<String>,
}

/// Per-container metrics sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerMetrics {
    /// Container name.
    pub name: String,
    /// CPU.
    pub cpu: CpuUsage,
    /// Memory.
    pub memory: MemoryUsage,
}

/// Metrics of one workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    /// Workload name.
    pub name: String,
    /// Namespace (Kubernetes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Per-container samples.
    pub containers: Vec<ContainerMetrics>,
    /// Aggregate CPU.
    #[serde(rename = "totalCPU")]
    pub total_cpu: String,
    /// Aggregate memory.
    pub total_memory: String,
}

/// Log query options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LogOptions {
    /// Keep the connection open.
    pub follow: bool,
    /// Number of trailing lines.
    pub tail_lines: Option<i64>,
    /// Relative start.
    pub since_seconds: Option<i64>,
    /// Absolute start.
    pub since_time: Option<DateTime<Utc>>,
    /// Prefix lines with timestamps.
    pub timestamps: bool,
    /// Container within the pod.
    pub container: Option<String>,
    /// Previous container instance.
    pub previous: bool,
}

/// Severity of a deployment event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    /// Informational.
    Normal,
    /// Something went wrong.
    Warning,
}

/// Event about a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    /// Severity.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Short reason.
    pub reason: String,
    /// Message.
    pub message: String,
    /// Occurrences.
    pub count: i32,
    /// First occurrence.
    pub first_timestamp: DateTime<Utc>,
    /// Last occurrence.
    pub last_timestamp: DateTime<Utc>,
}

/// Metadata of a custom resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomResourceMetadata {
    /// Object name.
    pub name: String,
    /// Namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Arbitrary namespaced custom object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomResource {
    /// `group/version`, or a bare version for the core group.
    pub api_version: String,
    /// Kind.
    pub kind: String,
    /// Metadata.
    pub metadata: CustomResourceMetadata,
    /// Spec.
    #[serde(default)]
    pub spec: Value,
    /// Status, as reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl CustomResource {
    /// Empty resource of the given type.
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: CustomResourceMetadata {
                name: name.into(),
                ..Default::default()
            },
            spec: Value::Object(Default::default()),
            status: None,
        }
    }

    /// Splits the api version into group and version.
    pub fn group_version(&self) -> (&str, &str) {
        split_api_version(&self.api_version)
    }
}

/// Splits `group/version` into its parts; a bare version maps to the core group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}
