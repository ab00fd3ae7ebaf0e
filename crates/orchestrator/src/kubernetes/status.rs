//! Maps cluster objects back into orchestration DTOs.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use common::api::{
    ConditionStatus, ContainerMetrics, CpuUsage, CustomResource, CustomResourceMetadata,
    Deployment, DeploymentCondition, DeploymentEvent, DeploymentStatus, EventType, HpaCondition,
    HpaMetricStatus, HpaStatus, Ingress, IngressPath, IngressRule, IntOrString as PortOrPercent,
    IpBlock, MemoryUsage, NetworkPolicyConfig, NetworkPolicyPeer as PeerConfig,
    NetworkPolicyPort as PortConfig, NetworkPolicyRule, PathType, PolicyType, Protocol,
    ReplicaCounts, ResourceMetrics, Service, ServicePort, ServiceType,
};
use k8s_openapi::api::apps::v1::{Deployment as K8sDeployment, DeploymentStatus as K8sStatus};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Event, Service as K8sService};
use k8s_openapi::api::networking::v1::{
    Ingress as K8sIngress, NetworkPolicy, NetworkPolicyPeer, NetworkPolicyPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;

use crate::quantity::{format_cores, format_mebibytes, usage_bytes, usage_nano_cores};

fn count(value: Option<i32>) -> u32 {
    value.and_then(|v| u32::try_from(v).ok()).unwrap_or(0)
}

/// Missing counters read as zero.
pub(crate) fn deployment_status(status: Option<&K8sStatus>) -> DeploymentStatus {
    let failed = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "False")
        });
    if failed {
        return DeploymentStatus::Failed;
    }

    let replicas = count(status.and_then(|s| s.replicas));
    let available = count(status.and_then(|s| s.available_replicas));
    let updated = count(status.and_then(|s| s.updated_replicas));
    if available == replicas {
        DeploymentStatus::Running
    } else if updated != replicas {
        DeploymentStatus::Updating
    } else if available < replicas {
        DeploymentStatus::Scaling
    } else {
        DeploymentStatus::Pending
    }
}

pub(crate) fn to_deployment(deployment: &K8sDeployment) -> Deployment {
    let status = deployment.status.as_ref();
    let conditions = status
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();
    let updated_at = conditions
        .iter()
        .filter_map(|c| c.last_update_time.as_ref().map(|t| t.0))
        .max();
    let image = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    Deployment {
        name: deployment.metadata.name.clone().unwrap_or_default(),
        namespace: deployment.metadata.namespace.clone(),
        status: deployment_status(status),
        replicas: ReplicaCounts {
            desired: count(deployment.spec.as_ref().and_then(|s| s.replicas)),
            ready: count(status.and_then(|s| s.ready_replicas)),
            available: count(status.and_then(|s| s.available_replicas)),
            unavailable: status
                .and_then(|s| s.unavailable_replicas)
                .and_then(|v| u32::try_from(v).ok()),
        },
        image,
        created_at: deployment.metadata.creation_timestamp.as_ref().map(|t| t.0),
        updated_at,
        conditions: conditions
            .into_iter()
            .map(|c| DeploymentCondition {
                kind: c.type_,
                status: ConditionStatus::parse(&c.status),
                reason: c.reason,
                message: c.message,
                last_transition_time: c.last_transition_time.map(|t| t.0),
            })
            .collect(),
    }
}

fn port_number(value: i32) -> u16 {
    u16::try_from(value).unwrap_or(0)
}

pub(crate) fn to_service(service: &K8sService, name: &str) -> Service {
    let spec = service.spec.as_ref();
    let external_ips = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .map(|i| i.ip.clone().or_else(|| i.hostname.clone()).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ServicePort {
                    name: p.name.clone(),
                    port: port_number(p.port),
                    target_port: match &p.target_port {
                        Some(IntOrString::Int(v)) => port_number(*v),
                        _ => 0,
                    },
                    protocol: p
                        .protocol
                        .as_deref()
                        .map(Protocol::parse_lenient)
                        .unwrap_or_default(),
                    node_port: p.node_port.map(port_number),
                })
                .collect()
        })
        .unwrap_or_default();

    Service {
        name: service.metadata.name.clone().unwrap_or_else(|| name.to_string()),
        namespace: service.metadata.namespace.clone(),
        service_type: spec
            .and_then(|s| s.type_.as_deref())
            .map(ServiceType::parse)
            .unwrap_or_default(),
        cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
        external_ips,
        ports,
        selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
    }
}

/// Native `networking.k8s.io/v1` ingress; paths default to `/` `Prefix` on port 80.
pub(crate) fn to_ingress(ingress: &K8sIngress, name: &str) -> Ingress {
    let spec = ingress.spec.as_ref();
    let rules: Vec<IngressRule> = spec
        .and_then(|s| s.rules.as_ref())
        .map(|rules| {
            rules
                .iter()
                .map(|rule| IngressRule {
                    host: rule.host.clone().unwrap_or_default(),
                    paths: rule
                        .http
                        .as_ref()
                        .map(|http| {
                            http.paths
                                .iter()
                                .map(|p| {
                                    let backend = p.backend.service.as_ref();
                                    IngressPath {
                                        path: p.path.clone().unwrap_or_else(|| "/".to_string()),
                                        path_type: PathType::parse(&p.path_type),
                                        service_name: backend
                                            .map(|b| b.name.clone())
                                            .unwrap_or_default(),
                                        service_port: backend
                                            .and_then(|b| b.port.as_ref())
                                            .and_then(|port| port.number)
                                            .map_or(80, port_number),
                                    }
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let mut hosts: Vec<String> = Vec::new();
    for rule in &rules {
        if !rule.host.is_empty() && !hosts.contains(&rule.host) {
            hosts.push(rule.host.clone());
        }
    }

    Ingress {
        name: ingress.metadata.name.clone().unwrap_or_else(|| name.to_string()),
        namespace: ingress.metadata.namespace.clone(),
        hosts,
        tls: spec
            .and_then(|s| s.tls.as_ref())
            .is_some_and(|tls| !tls.is_empty()),
        rules,
    }
}

pub(crate) fn to_hpa_status(hpa: &HorizontalPodAutoscaler) -> HpaStatus {
    let status = hpa.status.as_ref();
    let target_of = |resource: &str| {
        hpa.spec
            .as_ref()
            .and_then(|s| s.metrics.as_ref())
            .and_then(|metrics| {
                metrics
                    .iter()
                    .filter_map(|m| m.resource.as_ref())
                    .find(|r| r.name == resource)
            })
            .and_then(|r| r.target.average_utilization)
            .unwrap_or(0)
    };

    HpaStatus {
        current_replicas: status.and_then(|s| s.current_replicas).unwrap_or(0),
        desired_replicas: status.map(|s| s.desired_replicas).unwrap_or(0),
        current_metrics: status
            .and_then(|s| s.current_metrics.as_ref())
            .map(|metrics| {
                metrics
                    .iter()
                    .map(|m| {
                        let resource = m.resource.as_ref();
                        let name = resource
                            .map(|r| r.name.clone())
                            .unwrap_or_else(|| "unknown".to_string());
                        HpaMetricStatus {
                            current_value: resource
                                .and_then(|r| r.current.average_utilization)
                                .unwrap_or(0)
                                .to_string(),
                            target_value: target_of(&name).to_string(),
                            name,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default(),
        conditions: status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| HpaCondition {
                        kind: c.type_.clone(),
                        status: ConditionStatus::parse(&c.status),
                        reason: c.reason.clone(),
                        message: c.message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        last_scale_time: status
            .and_then(|s| s.last_scale_time.as_ref())
            .map(|t| t.0),
    }
}

fn labels_of(selector: Option<&LabelSelector>) -> Option<BTreeMap<String, String>> {
    selector.and_then(|s| s.match_labels.clone())
}

fn peer(peer: &NetworkPolicyPeer) -> PeerConfig {
    PeerConfig {
        pod_selector: labels_of(peer.pod_selector.as_ref()),
        namespace_selector: labels_of(peer.namespace_selector.as_ref()),
        ip_block: peer.ip_block.as_ref().map(|block| IpBlock {
            cidr: block.cidr.clone(),
            except: block.except.clone().unwrap_or_default(),
        }),
    }
}

fn policy_port(port: &NetworkPolicyPort) -> PortConfig {
    PortConfig {
        protocol: port.protocol.as_deref().map(Protocol::parse_lenient),
        port: port.port.as_ref().map(|p| match p {
            IntOrString::Int(v) => PortOrPercent::Int(*v),
            IntOrString::String(v) => PortOrPercent::String(v.clone()),
        }),
    }
}

pub(crate) fn to_network_policy(policy: &NetworkPolicy, name: &str) -> NetworkPolicyConfig {
    let spec = policy.spec.as_ref();
    let ports = |list: &Option<Vec<NetworkPolicyPort>>| {
        list.iter().flatten().map(policy_port).collect::<Vec<_>>()
    };
    let peers = |list: &Option<Vec<NetworkPolicyPeer>>| {
        list.iter().flatten().map(peer).collect::<Vec<_>>()
    };

    NetworkPolicyConfig {
        name: policy.metadata.name.clone().unwrap_or_else(|| name.to_string()),
        namespace: policy.metadata.namespace.clone(),
        pod_selector: labels_of(spec.map(|s| &s.pod_selector)).unwrap_or_default(),
        policy_types: spec
            .and_then(|s| s.policy_types.as_ref())
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| match t.as_str() {
                        "Ingress" => Some(PolicyType::Ingress),
                        "Egress" => Some(PolicyType::Egress),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        ingress: spec
            .and_then(|s| s.ingress.as_ref())
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| NetworkPolicyRule {
                        from: peers(&rule.from),
                        to: Vec::new(),
                        ports: ports(&rule.ports),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        egress: spec
            .and_then(|s| s.egress.as_ref())
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| NetworkPolicyRule {
                        from: Vec::new(),
                        to: peers(&rule.to),
                        ports: ports(&rule.ports),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

pub(crate) fn to_event(event: &Event, now: DateTime<Utc>) -> DeploymentEvent {
    let kind = match event.type_.as_deref() {
        Some("Warning") => EventType::Warning,
        _ => EventType::Normal,
    };
    DeploymentEvent {
        kind,
        reason: event.reason.clone().unwrap_or_else(|| "Unknown".to_string()),
        message: event.message.clone().unwrap_or_default(),
        count: event.count.unwrap_or(1),
        first_timestamp: event.first_timestamp.as_ref().map_or(now, |t| t.0),
        last_timestamp: event.last_timestamp.as_ref().map_or(now, |t| t.0),
    }
}

/// Aggregates metrics-server samples of the pods in `pods`.
pub(crate) fn to_metrics(
    name: &str,
    namespace: &str,
    pods: &HashSet<String>,
    samples: &[DynamicObject],
    now: DateTime<Utc>,
) -> Option<ResourceMetrics> {
    let mut containers = Vec::new();
    let mut total_cpu = 0_u64;
    let mut total_memory = 0_u64;

    let matching = samples.iter().filter(|sample| {
        sample
            .metadata
            .name
            .as_ref()
            .is_some_and(|pod| pods.contains(pod))
    });
    for sample in matching {
        let entries = sample
            .data
            .get("containers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for entry in entries {
            let usage = |key: &str| {
                entry
                    .get("usage")
                    .and_then(|u| u.get(key))
                    .and_then(Value::as_str)
                    .unwrap_or("0")
                    .to_string()
            };
            let cpu = usage("cpu");
            let memory = usage("memory");
            let nano_cores = usage_nano_cores(&cpu);
            let bytes = usage_bytes(&memory);
            total_cpu += nano_cores;
            total_memory += bytes;

            containers.push(ContainerMetrics {
                name: entry
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                cpu: CpuUsage {
                    usage: cpu,
                    usage_nano_cores: Some(nano_cores),
                },
                memory: MemoryUsage {
                    working_set: Some(memory.clone()),
                    usage: memory,
                    usage_bytes: Some(bytes),
                },
            });
        }
    }

    if containers.is_empty() {
        return None;
    }
    Some(ResourceMetrics {
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        timestamp: now,
        containers,
        total_cpu: format_cores(total_cpu),
        total_memory: format_mebibytes(total_memory),
    })
}

pub(crate) fn to_dynamic(resource: &CustomResource, namespace: &str, api: &ApiResource) -> DynamicObject {
    let mut data = serde_json::json!({ "spec": resource.spec });
    if let Some(status) = &resource.status {
        data["status"] = status.clone();
    }
    let mut object = DynamicObject::new(&resource.metadata.name, api)
        .within(namespace)
        .data(data);
    object.metadata.labels = (!resource.metadata.labels.is_empty())
        .then(|| resource.metadata.labels.clone());
    object.metadata.annotations = (!resource.metadata.annotations.is_empty())
        .then(|| resource.metadata.annotations.clone());
    object
}

pub(crate) fn to_custom_resource(object: &DynamicObject, api: &ApiResource) -> CustomResource {
    let ObjectMeta {
        name,
        namespace,
        labels,
        annotations,
        ..
    } = object.metadata.clone();
    let types = object.types.as_ref();
    CustomResource {
        api_version: types
            .map(|t| t.api_version.clone())
            .unwrap_or_else(|| api.api_version.clone()),
        kind: types
            .map(|t| t.kind.clone())
            .unwrap_or_else(|| api.kind.clone()),
        metadata: CustomResourceMetadata {
            name: name.unwrap_or_default(),
            namespace,
            labels: labels.unwrap_or_default(),
            annotations: annotations.unwrap_or_default(),
        },
        spec: object.data.get("spec").cloned().unwrap_or(Value::Null),
        status: object.data.get("status").cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::GroupVersionKind;
    use serde_json::json;

    fn k8s_deployment(status: Value) -> K8sDeployment {
        serde_json::from_value(json!({
            "metadata": {
                "name": "web",
                "namespace": "apps",
                "creationTimestamp": "2024-05-01T10:00:00Z"
            },
            "spec": {
                "replicas": 3,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"spec": {"containers": [{"name": "web", "image": "nginx:1.25"}]}}
            },
            "status": status
        }))
        .unwrap()
    }

    fn status_of(status: Value) -> DeploymentStatus {
        to_deployment(&k8s_deployment(status)).status
    }

    #[test]
    fn status_mapping_follows_counters() {
        assert_eq!(
            status_of(json!({"replicas": 3, "availableReplicas": 3, "updatedReplicas": 3})),
            DeploymentStatus::Running
        );
        assert_eq!(
            status_of(json!({"replicas": 3, "availableReplicas": 1, "updatedReplicas": 2})),
            DeploymentStatus::Updating
        );
        assert_eq!(
            status_of(json!({"replicas": 3, "availableReplicas": 1, "updatedReplicas": 3})),
            DeploymentStatus::Scaling
        );
        assert_eq!(
            status_of(json!({"replicas": 2, "availableReplicas": 3, "updatedReplicas": 2})),
            DeploymentStatus::Pending
        );
        // Absent counters are all zero.
        assert_eq!(status_of(json!({})), DeploymentStatus::Running);
    }

    #[test]
    fn unavailable_condition_wins() {
        let status = json!({
            "replicas": 3,
            "availableReplicas": 3,
            "updatedReplicas": 3,
            "conditions": [{
                "type": "Available",
                "status": "False",
                "reason": "MinimumReplicasUnavailable",
                "lastTransitionTime": "2024-05-01T10:05:00Z",
                "lastUpdateTime": "2024-05-01T10:06:00Z"
            }]
        });
        let deployment = to_deployment(&k8s_deployment(status));
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert_eq!(deployment.image, "nginx:1.25");
        assert_eq!(deployment.replicas.desired, 3);
        assert_eq!(deployment.conditions[0].status, ConditionStatus::False);
        assert_eq!(
            deployment.updated_at.map(|t| t.to_rfc3339()),
            Some("2024-05-01T10:06:00+00:00".to_string())
        );
        assert!(deployment.created_at.is_some());
    }

    #[test]
    fn service_reads_load_balancer_addresses() {
        let service: K8sService = serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "apps"},
            "spec": {
                "type": "LoadBalancer",
                "clusterIP": "10.96.0.12",
                "selector": {"app": "web"},
                "ports": [{"name": "port-80", "port": 80, "targetPort": 8080, "protocol": "TCP"},
                          {"port": 53, "targetPort": "dns", "protocol": "UDP"}]
            },
            "status": {"loadBalancer": {"ingress": [{"ip": "1.2.3.4"}, {"hostname": "lb.example.com"}]}}
        }))
        .unwrap();
        let mapped = to_service(&service, "web");
        assert_eq!(mapped.service_type, ServiceType::LoadBalancer);
        assert_eq!(mapped.external_ips, vec!["1.2.3.4", "lb.example.com"]);
        assert_eq!(mapped.ports[0].target_port, 8080);
        assert_eq!(mapped.ports[1].target_port, 0);
        assert_eq!(mapped.ports[1].protocol, Protocol::Udp);
        assert_eq!(mapped.selector["app"], "web");
    }

    #[test]
    fn native_ingress_defaults() {
        let ingress: K8sIngress = serde_json::from_value(json!({
            "metadata": {"name": "web-ingress", "namespace": "apps"},
            "spec": {
                "tls": [{"hosts": ["web.example.com"]}],
                "rules": [{
                    "host": "web.example.com",
                    "http": {"paths": [{
                        "pathType": "ImplementationSpecific",
                        "backend": {"service": {"name": "web"}}
                    }]}
                }]
            }
        }))
        .unwrap();
        let mapped = to_ingress(&ingress, "web-ingress");
        assert!(mapped.tls);
        assert_eq!(mapped.hosts, vec!["web.example.com"]);
        let path = &mapped.rules[0].paths[0];
        assert_eq!(path.path, "/");
        assert_eq!(path.path_type, PathType::ImplementationSpecific);
        assert_eq!(path.service_port, 80);
    }

    #[test]
    fn hpa_status_pairs_current_with_target() {
        let hpa: HorizontalPodAutoscaler = serde_json::from_value(json!({
            "metadata": {"name": "web-hpa"},
            "spec": {
                "scaleTargetRef": {"kind": "Deployment", "name": "web"},
                "maxReplicas": 10,
                "metrics": [{"type": "Resource", "resource": {"name": "cpu",
                    "target": {"type": "Utilization", "averageUtilization": 70}}}]
            },
            "status": {
                "currentReplicas": 2,
                "desiredReplicas": 4,
                "currentMetrics": [{"type": "Resource", "resource": {"name": "cpu",
                    "current": {"averageUtilization": 95}}}],
                "conditions": [{"type": "AbleToScale", "status": "True", "reason": "SucceededRescale"}]
            }
        }))
        .unwrap();
        let status = to_hpa_status(&hpa);
        assert_eq!(status.current_replicas, 2);
        assert_eq!(status.desired_replicas, 4);
        assert_eq!(status.current_metrics[0].current_value, "95");
        assert_eq!(status.current_metrics[0].target_value, "70");
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
        assert!(status.last_scale_time.is_none());
    }

    #[test]
    fn events_default_missing_fields() {
        let event: Event = serde_json::from_value(json!({
            "metadata": {"name": "web.1"},
            "involvedObject": {"name": "web"},
            "type": "Warning",
            "reason": "BackOff",
            "message": "Back-off restarting failed container"
        }))
        .unwrap();
        let now = Utc::now();
        let mapped = to_event(&event, now);
        assert_eq!(mapped.kind, EventType::Warning);
        assert_eq!(mapped.count, 1);
        assert_eq!(mapped.first_timestamp, now);
    }

    #[test]
    fn metrics_sum_matching_pods_only() {
        let api = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics"),
            "pods",
        );
        let sample = |pod: &str, cpu: &str, memory: &str| {
            DynamicObject::new(pod, &api).data(json!({
                "containers": [{"name": "web", "usage": {"cpu": cpu, "memory": memory}}]
            }))
        };
        let samples = vec![
            sample("web-1", "250m", "128Mi"),
            sample("web-2", "1000000n", "131072Ki"),
            sample("db-1", "2", "1Gi"),
        ];
        let pods = HashSet::from(["web-1".to_string(), "web-2".to_string()]);

        let metrics = to_metrics("web", "apps", &pods, &samples, Utc::now()).unwrap();
        assert_eq!(metrics.containers.len(), 2);
        assert_eq!(metrics.containers[0].cpu.usage_nano_cores, Some(250_000_000));
        assert_eq!(metrics.total_cpu, "0.251");
        assert_eq!(metrics.total_memory, "256Mi");

        assert!(to_metrics("web", "apps", &HashSet::new(), &samples, Utc::now()).is_none());
    }

    #[test]
    fn custom_resources_convert_through_dynamic_objects() {
        let api = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("traefik.io", "v1alpha1", "Middleware"),
            "middlewares",
        );
        let mut resource = CustomResource::new("traefik.io/v1alpha1", "Middleware", "strip");
        resource.spec = json!({"stripPrefix": {"prefixes": ["/api"]}});

        let object = to_dynamic(&resource, "apps", &api);
        assert_eq!(object.metadata.namespace.as_deref(), Some("apps"));
        let back = to_custom_resource(&object, &api);
        assert_eq!(back.kind, "Middleware");
        assert_eq!(back.api_version, "traefik.io/v1alpha1");
        assert_eq!(back.spec, resource.spec);
        assert_eq!(back.metadata.namespace.as_deref(), Some("apps"));
    }
}
