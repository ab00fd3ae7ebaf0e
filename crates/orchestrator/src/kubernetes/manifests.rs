//! Typed Kubernetes objects built from orchestration requests.

use std::collections::BTreeMap;

use common::api::{
    CustomMetric, CustomMetricType, DeploymentConfig, DeploymentPatch, HpaBehavior, HpaConfig,
    IngressConfig, IntOrString as PortOrPercent, MetricTarget as TargetConfig,
    NetworkPolicyConfig, NetworkPolicyPeer as PeerConfig, NetworkPolicyPort as PortConfig,
    NetworkPolicyRule, PdbConfig, ProbeConfig, ResourceRequirements as ResourceConfig,
    ScalingPolicyType, ScalingRules, ServiceConfig, ServicePatch, ServicePort, ServiceType,
    StrategyType, Volume as VolumeConfig, MANAGED_LABEL,
};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, ExternalMetricSource, HPAScalingPolicy, HPAScalingRules,
    HorizontalPodAutoscaler, HorizontalPodAutoscalerBehavior, HorizontalPodAutoscalerSpec,
    MetricIdentifier, MetricSpec, MetricTarget, PodsMetricSource, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction, HostPathVolumeSource, Namespace,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Service, ServicePort as K8sServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub(crate) const APP_LABEL: &str = "app";

pub(crate) fn hpa_name(app: &str) -> String {
    format!("{app}-hpa")
}

pub(crate) fn pdb_name(app: &str) -> String {
    format!("{app}-pdb")
}

pub(crate) fn network_policy_name(app: &str) -> String {
    format!("{app}-network-policy")
}

pub(crate) fn app_selector(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), app.to_string())])
}

fn match_labels(labels: &BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    }
}

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn non_empty<K: Ord, V>(map: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    (!map.is_empty()).then_some(map)
}

fn int_or_string(value: &PortOrPercent) -> IntOrString {
    match value {
        PortOrPercent::Int(v) => IntOrString::Int(*v),
        PortOrPercent::String(v) => IntOrString::String(v.clone()),
    }
}

pub(crate) fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn strategy(config: &DeploymentConfig) -> DeploymentStrategy {
    match &config.strategy {
        Some(strategy) if strategy.kind == StrategyType::Rolling => DeploymentStrategy {
            type_: Some("RollingUpdate".to_string()),
            rolling_update: strategy.rolling_update.as_ref().map(|bounds| {
                RollingUpdateDeployment {
                    max_surge: Some(int_or_string(&bounds.max_surge)),
                    max_unavailable: Some(int_or_string(&bounds.max_unavailable)),
                }
            }),
        },
        Some(_) => DeploymentStrategy {
            type_: Some("Recreate".to_string()),
            rolling_update: None,
        },
        None => DeploymentStrategy {
            type_: Some("RollingUpdate".to_string()),
            rolling_update: Some(RollingUpdateDeployment {
                max_surge: Some(IntOrString::String("25%".to_string())),
                max_unavailable: Some(IntOrString::String("25%".to_string())),
            }),
        },
    }
}

pub(crate) fn env_vars(env: &BTreeMap<String, String>) -> Vec<EnvVar> {
    env.iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect()
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn resources(config: &ResourceConfig) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(quantities(&config.requests.cpu, &config.requests.memory)),
        limits: Some(quantities(&config.limits.cpu, &config.limits.memory)),
        ..Default::default()
    }
}

pub(crate) fn probe(config: &ProbeConfig) -> Probe {
    Probe {
        http_get: config.http_get.as_ref().map(|http| HTTPGetAction {
            path: Some(http.path.clone()),
            port: IntOrString::Int(i32::from(http.port)),
            scheme: http.scheme.map(|s| s.as_str().to_string()),
            ..Default::default()
        }),
        tcp_socket: config.tcp_socket.as_ref().map(|tcp| TCPSocketAction {
            port: IntOrString::Int(i32::from(tcp.port)),
            ..Default::default()
        }),
        exec: config.exec.as_ref().map(|exec| ExecAction {
            command: Some(exec.command.clone()),
        }),
        initial_delay_seconds: Some(config.initial_delay_seconds),
        period_seconds: Some(config.period_seconds),
        timeout_seconds: Some(config.timeout_seconds),
        failure_threshold: Some(config.failure_threshold),
        success_threshold: config.success_threshold,
        ..Default::default()
    }
}

fn volume(config: &VolumeConfig) -> Volume {
    Volume {
        name: config.name.clone(),
        persistent_volume_claim: config.pvc_name.as_ref().map(|claim| {
            PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                read_only: None,
            }
        }),
        host_path: config.host_path.as_ref().map(|path| HostPathVolumeSource {
            path: path.clone(),
            type_: None,
        }),
        ..Default::default()
    }
}

fn volume_mount(config: &VolumeConfig) -> VolumeMount {
    VolumeMount {
        name: config.name.clone(),
        mount_path: config.mount_path.clone(),
        read_only: Some(config.read_only),
        ..Default::default()
    }
}

fn container(config: &DeploymentConfig) -> Container {
    let ports = config
        .ports
        .iter()
        .map(|port| ContainerPort {
            container_port: i32::from(port.container_port),
            protocol: Some(port.protocol.as_str().to_string()),
            ..Default::default()
        })
        .collect::<Vec<_>>();
    let mounts = config.volumes.iter().map(volume_mount).collect::<Vec<_>>();
    let liveness = config
        .liveness_probe
        .as_ref()
        .or(config.health_check.as_ref());

    Container {
        name: config.name.clone(),
        image: Some(config.image.clone()),
        ports: (!ports.is_empty()).then_some(ports),
        env: Some(env_vars(&config.env)),
        command: config.command.clone(),
        args: config.args.clone(),
        resources: config.resources.as_ref().map(resources),
        liveness_probe: liveness.map(probe),
        readiness_probe: config.readiness_probe.as_ref().map(probe),
        startup_probe: config.startup_probe.as_ref().map(probe),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    }
}

pub(crate) fn deployment(config: &DeploymentConfig, namespace: &str) -> Deployment {
    let mut labels = app_selector(&config.name);
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.extend(config.labels.clone());

    let mut pod_labels = app_selector(&config.name);
    pod_labels.extend(config.labels.clone());

    let annotations = non_empty(config.annotations.clone());
    let volumes = config.volumes.iter().map(volume).collect::<Vec<_>>();

    Deployment {
        metadata: ObjectMeta {
            labels: Some(labels),
            annotations: annotations.clone(),
            ..meta(&config.name, namespace)
        },
        spec: Some(DeploymentSpec {
            replicas: Some(i32::try_from(config.replicas).unwrap_or(i32::MAX)),
            selector: match_labels(&app_selector(&config.name)),
            strategy: Some(strategy(config)),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: config.service_account.clone(),
                    containers: vec![container(config)],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Merges a partial update into the first container of `existing`.
pub(crate) fn apply_patch(existing: &mut Deployment, patch: &DeploymentPatch) {
    let Some(spec) = existing.spec.as_mut() else {
        return;
    };
    if let Some(replicas) = patch.replicas {
        spec.replicas = Some(i32::try_from(replicas).unwrap_or(i32::MAX));
    }
    let Some(container) = spec
        .template
        .spec
        .as_mut()
        .and_then(|pod| pod.containers.first_mut())
    else {
        return;
    };
    if let Some(image) = &patch.image {
        container.image = Some(image.clone());
    }
    if let Some(env) = &patch.env {
        container.env = Some(env_vars(env));
    }
    if let Some(command) = &patch.command {
        container.command = Some(command.clone());
    }
    if let Some(args) = &patch.args {
        container.args = Some(args.clone());
    }
}

/// Service fronting the pods of a deployment on each of its container ports.
pub(crate) fn deployment_service(config: &DeploymentConfig, namespace: &str) -> ServiceConfig {
    ServiceConfig {
        name: config.name.clone(),
        namespace: Some(namespace.to_string()),
        selector: app_selector(&config.name),
        ports: config
            .ports
            .iter()
            .map(|port| ServicePort {
                name: None,
                port: port.container_port,
                target_port: port.container_port,
                protocol: port.protocol,
                node_port: None,
            })
            .collect(),
        service_type: None,
    }
}

/// Ingress for a deployment with a domain, routed to its first port.
pub(crate) fn deployment_ingress(config: &DeploymentConfig, namespace: &str) -> Option<IngressConfig> {
    let domain = config.domain.clone()?;
    Some(IngressConfig {
        name: config.name.clone(),
        namespace: Some(namespace.to_string()),
        domain,
        service_name: config.name.clone(),
        service_port: config.ports.first().map_or(80, |p| p.container_port),
        ssl: config.ssl,
        cert_resolver: None,
        middlewares: Vec::new(),
        path_prefix: None,
        strip_prefix: false,
    })
}

fn service_ports(ports: &[ServicePort]) -> Vec<K8sServicePort> {
    ports
        .iter()
        .map(|port| K8sServicePort {
            name: Some(
                port.name
                    .clone()
                    .unwrap_or_else(|| format!("port-{}", port.port)),
            ),
            port: i32::from(port.port),
            target_port: Some(IntOrString::Int(i32::from(port.target_port))),
            protocol: Some(port.protocol.as_str().to_string()),
            node_port: port.node_port.map(i32::from),
            ..Default::default()
        })
        .collect()
}

pub(crate) fn service(config: &ServiceConfig, namespace: &str) -> Service {
    Service {
        metadata: meta(&config.name, namespace),
        spec: Some(ServiceSpec {
            selector: Some(config.selector.clone()),
            type_: Some(
                config
                    .service_type
                    .unwrap_or(ServiceType::ClusterIp)
                    .as_str()
                    .to_string(),
            ),
            ports: Some(service_ports(&config.ports)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Carries the identity fields the API server requires on replace.
pub(crate) fn preserve_service_identity(desired: &mut Service, current: &Service) {
    desired.metadata.resource_version = current.metadata.resource_version.clone();
    let cluster_ip = current.spec.as_ref().and_then(|s| s.cluster_ip.clone());
    let cluster_ips = current.spec.as_ref().and_then(|s| s.cluster_ips.clone());
    if let Some(spec) = desired.spec.as_mut() {
        spec.cluster_ip = cluster_ip;
        spec.cluster_ips = cluster_ips;
    }
}

pub(crate) fn apply_service_patch(existing: &mut Service, patch: &ServicePatch) {
    let spec = existing.spec.get_or_insert_with(Default::default);
    if let Some(selector) = &patch.selector {
        spec.selector = Some(selector.clone());
    }
    if let Some(service_type) = patch.service_type {
        spec.type_ = Some(service_type.as_str().to_string());
    }
    if let Some(ports) = &patch.ports {
        spec.ports = Some(service_ports(ports));
    }
}

fn scaling_rules(rules: &ScalingRules) -> HPAScalingRules {
    HPAScalingRules {
        stabilization_window_seconds: rules.stabilization_window_seconds,
        policies: Some(
            rules
                .policies
                .iter()
                .map(|p| HPAScalingPolicy {
                    type_: p.kind.as_str().to_string(),
                    value: p.value,
                    period_seconds: p.period_seconds,
                })
                .collect(),
        ),
        ..Default::default()
    }
}

fn percent_rules(window: i32, value: i32, period: i32) -> HPAScalingRules {
    HPAScalingRules {
        stabilization_window_seconds: Some(window),
        policies: Some(vec![HPAScalingPolicy {
            type_: ScalingPolicyType::Percent.as_str().to_string(),
            value,
            period_seconds: period,
        }]),
        ..Default::default()
    }
}

/// Slow scale-down, fast scale-up.
fn default_behavior() -> HorizontalPodAutoscalerBehavior {
    HorizontalPodAutoscalerBehavior {
        scale_down: Some(percent_rules(300, 50, 60)),
        scale_up: Some(percent_rules(0, 100, 15)),
    }
}

fn behavior(config: &HpaBehavior) -> HorizontalPodAutoscalerBehavior {
    HorizontalPodAutoscalerBehavior {
        scale_down: config.scale_down.as_ref().map(scaling_rules),
        scale_up: config.scale_up.as_ref().map(scaling_rules),
    }
}

fn utilization(resource: &str, percent: i32) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: resource.to_string(),
            target: MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(percent),
                ..Default::default()
            },
        }),
        ..Default::default()
    }
}

fn metric_target(target: &TargetConfig) -> MetricTarget {
    MetricTarget {
        type_: target.kind.as_str().to_string(),
        value: target.value.clone().map(Quantity),
        average_value: target.average_value.clone().map(Quantity),
        average_utilization: target.average_utilization,
    }
}

fn custom_metric(metric: &CustomMetric) -> MetricSpec {
    let target = metric_target(&metric.target);
    let identifier = MetricIdentifier {
        name: metric.name.clone(),
        selector: None,
    };
    match metric.kind {
        CustomMetricType::Resource => MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: metric.name.clone(),
                target,
            }),
            ..Default::default()
        },
        CustomMetricType::Pods => MetricSpec {
            type_: "Pods".to_string(),
            pods: Some(PodsMetricSource {
                metric: identifier,
                target,
            }),
            ..Default::default()
        },
        CustomMetricType::External => MetricSpec {
            type_: "External".to_string(),
            external: Some(ExternalMetricSource {
                metric: identifier,
                target,
            }),
            ..Default::default()
        },
    }
}

pub(crate) fn hpa(config: &HpaConfig, namespace: &str) -> HorizontalPodAutoscaler {
    let name = config
        .name
        .clone()
        .unwrap_or_else(|| hpa_name(&config.target_name));

    let mut metrics = Vec::new();
    if let Some(cpu) = config.target_cpu {
        metrics.push(utilization("cpu", cpu));
    }
    if let Some(memory) = config.target_memory {
        metrics.push(utilization("memory", memory));
    }
    metrics.extend(config.custom_metrics.iter().map(custom_metric));

    HorizontalPodAutoscaler {
        metadata: meta(&name, namespace),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: config.target_name.clone(),
            },
            min_replicas: Some(config.min_replicas),
            max_replicas: config.max_replicas,
            metrics: (!metrics.is_empty()).then_some(metrics),
            behavior: Some(
                config
                    .behavior
                    .as_ref()
                    .map_or_else(default_behavior, behavior),
            ),
        }),
        ..Default::default()
    }
}

fn peer(config: &PeerConfig) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: config.pod_selector.as_ref().map(match_labels),
        namespace_selector: config.namespace_selector.as_ref().map(match_labels),
        ip_block: config.ip_block.as_ref().map(|block| IPBlock {
            cidr: block.cidr.clone(),
            except: (!block.except.is_empty()).then(|| block.except.clone()),
        }),
    }
}

fn policy_port(config: &PortConfig) -> NetworkPolicyPort {
    NetworkPolicyPort {
        protocol: config.protocol.map(|p| p.as_str().to_string()),
        port: config.port.as_ref().map(int_or_string),
        end_port: None,
    }
}

fn peers(list: &[PeerConfig]) -> Option<Vec<NetworkPolicyPeer>> {
    (!list.is_empty()).then(|| list.iter().map(peer).collect())
}

fn ports(list: &[PortConfig]) -> Option<Vec<NetworkPolicyPort>> {
    (!list.is_empty()).then(|| list.iter().map(policy_port).collect())
}

fn ingress_rule(rule: &NetworkPolicyRule) -> NetworkPolicyIngressRule {
    NetworkPolicyIngressRule {
        from: peers(&rule.from),
        ports: ports(&rule.ports),
    }
}

fn egress_rule(rule: &NetworkPolicyRule) -> NetworkPolicyEgressRule {
    NetworkPolicyEgressRule {
        to: peers(&rule.to),
        ports: ports(&rule.ports),
    }
}

pub(crate) fn network_policy(config: &NetworkPolicyConfig, namespace: &str) -> NetworkPolicy {
    let policy_types = config
        .policy_types
        .iter()
        .map(|t| t.as_str().to_string())
        .collect::<Vec<_>>();
    NetworkPolicy {
        metadata: meta(&config.name, namespace),
        spec: Some(NetworkPolicySpec {
            pod_selector: match_labels(&config.pod_selector),
            policy_types: (!policy_types.is_empty()).then_some(policy_types),
            ingress: (!config.ingress.is_empty())
                .then(|| config.ingress.iter().map(ingress_rule).collect()),
            egress: (!config.egress.is_empty())
                .then(|| config.egress.iter().map(egress_rule).collect()),
        }),
    }
}

pub(crate) fn pdb(app: &str, namespace: &str, config: &PdbConfig) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: meta(&pdb_name(app), namespace),
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(match_labels(&app_selector(app))),
            min_available: config.min_available.map(IntOrString::Int),
            max_unavailable: config.max_unavailable.map(IntOrString::Int),
            ..Default::default()
        }),
        ..Default::default()
    }
}
