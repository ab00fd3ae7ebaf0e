//! Translation of a [`DeploymentConfig`] into a Swarm `ServiceSpec`.

use std::collections::HashMap;

use bollard::models::{
    EndpointPortConfig, EndpointPortConfigProtocolEnum, EndpointPortConfigPublishModeEnum,
    EndpointSpec, HealthConfig, Limit, Mount, MountTypeEnum, NetworkAttachmentConfig,
    ResourceObject, ServiceSpec, ServiceSpecMode, ServiceSpecModeReplicated,
    ServiceSpecRollbackConfig, ServiceSpecRollbackConfigFailureActionEnum,
    ServiceSpecRollbackConfigOrderEnum, ServiceSpecUpdateConfig,
    ServiceSpecUpdateConfigFailureActionEnum, ServiceSpecUpdateConfigOrderEnum, TaskSpec,
    TaskSpecContainerSpec, TaskSpecResources, TaskSpecRestartPolicy,
    TaskSpecRestartPolicyConditionEnum,
};
use common::api::{
    DeploymentConfig, DeploymentPatch, Port, ProbeConfig, Protocol, PublishMode,
    ResourceRequirements, ServicePort, Volume, MANAGED_LABEL,
};

use crate::quantity::{swarm_memory_bytes, swarm_nano_cpus};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const ROLLOUT_DELAY_NANOS: i64 = 10 * NANOS_PER_SEC;
const RESTART_MAX_ATTEMPTS: i64 = 3;

pub(crate) fn format_env<'a>(env: impl IntoIterator<Item = (&'a String, &'a String)>) -> Vec<String> {
    env.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

pub(crate) fn managed_labels<'a>(
    extra: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> HashMap<String, String> {
    let mut labels = HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]);
    labels.extend(extra.into_iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

/// Host paths bind-mount; everything else is a named volume.
fn build_mount(volume: &Volume) -> Mount {
    let (typ, source) = match &volume.host_path {
        Some(path) => (MountTypeEnum::BIND, path.clone()),
        None => (
            MountTypeEnum::VOLUME,
            volume.pvc_name.clone().unwrap_or_else(|| volume.name.clone()),
        ),
    };
    Mount {
        target: Some(volume.mount_path.clone()),
        source: Some(source),
        typ: Some(typ),
        read_only: Some(volume.read_only),
        ..Default::default()
    }
}

fn build_health_check(probe: &ProbeConfig) -> HealthConfig {
    let test = match (&probe.exec, &probe.http_get) {
        (Some(exec), _) => exec.command.clone(),
        (None, Some(http)) => vec![
            "CMD-SHELL".to_string(),
            format!(
                "curl -f http://localhost:{}{} || exit 1",
                http.port, http.path
            ),
        ],
        (None, None) => vec!["CMD-SHELL".to_string(), "exit 0".to_string()],
    };
    HealthConfig {
        test: Some(test),
        interval: Some(i64::from(probe.period_seconds) * NANOS_PER_SEC),
        timeout: Some(i64::from(probe.timeout_seconds) * NANOS_PER_SEC),
        retries: Some(i64::from(probe.failure_threshold)),
        start_period: Some(i64::from(probe.initial_delay_seconds) * NANOS_PER_SEC),
        ..Default::default()
    }
}

fn build_resources(resources: &ResourceRequirements) -> TaskSpecResources {
    TaskSpecResources {
        limits: Some(Limit {
            nano_cpus: Some(swarm_nano_cpus(&resources.limits.cpu)),
            memory_bytes: Some(swarm_memory_bytes(&resources.limits.memory)),
            ..Default::default()
        }),
        reservations: Some(ResourceObject {
            nano_cpus: Some(swarm_nano_cpus(&resources.requests.cpu)),
            memory_bytes: Some(swarm_memory_bytes(&resources.requests.memory)),
            ..Default::default()
        }),
    }
}

fn protocol(protocol: Protocol) -> EndpointPortConfigProtocolEnum {
    match protocol {
        Protocol::Tcp => EndpointPortConfigProtocolEnum::TCP,
        Protocol::Udp => EndpointPortConfigProtocolEnum::UDP,
    }
}

fn build_port(port: &Port) -> EndpointPortConfig {
    let publish_mode = match port.publish_mode {
        PublishMode::Ingress => EndpointPortConfigPublishModeEnum::INGRESS,
        PublishMode::Host => EndpointPortConfigPublishModeEnum::HOST,
    };
    EndpointPortConfig {
        protocol: Some(protocol(port.protocol)),
        target_port: Some(i64::from(port.container_port)),
        published_port: port.published_port.map(i64::from),
        publish_mode: Some(publish_mode),
        ..Default::default()
    }
}

/// Maps service ports onto endpoint ports published on the routing mesh.
pub(crate) fn endpoint_ports(ports: &[ServicePort]) -> EndpointSpec {
    EndpointSpec {
        ports: Some(
            ports
                .iter()
                .map(|p| EndpointPortConfig {
                    name: p.name.clone(),
                    protocol: Some(protocol(p.protocol)),
                    target_port: Some(i64::from(p.target_port)),
                    published_port: Some(i64::from(p.port)),
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    }
}

pub(crate) fn network_attachment(network: &str) -> Vec<NetworkAttachmentConfig> {
    vec![NetworkAttachmentConfig {
        target: Some(network.to_string()),
        ..Default::default()
    }]
}

pub(crate) fn replicated(replicas: u32) -> ServiceSpecMode {
    ServiceSpecMode {
        replicated: Some(ServiceSpecModeReplicated {
            replicas: Some(i64::from(replicas)),
        }),
        ..Default::default()
    }
}

pub(crate) fn build_service_spec(config: &DeploymentConfig, network: &str) -> ServiceSpec {
    let container_spec = TaskSpecContainerSpec {
        image: Some(config.image.clone()),
        env: Some(format_env(&config.env)),
        labels: Some(managed_labels(&config.labels)),
        mounts: Some(config.volumes.iter().map(build_mount).collect()),
        command: config.command.clone(),
        args: config.args.clone(),
        health_check: config.health_check.as_ref().map(build_health_check),
        ..Default::default()
    };

    ServiceSpec {
        name: Some(config.name.clone()),
        labels: Some(managed_labels(&config.labels)),
        task_template: Some(TaskSpec {
            container_spec: Some(container_spec),
            networks: Some(network_attachment(network)),
            resources: config.resources.as_ref().map(build_resources),
            restart_policy: Some(TaskSpecRestartPolicy {
                condition: Some(TaskSpecRestartPolicyConditionEnum::ON_FAILURE),
                max_attempts: Some(RESTART_MAX_ATTEMPTS),
                ..Default::default()
            }),
            ..Default::default()
        }),
        mode: Some(replicated(config.replicas)),
        update_config: Some(ServiceSpecUpdateConfig {
            parallelism: Some(1),
            delay: Some(ROLLOUT_DELAY_NANOS),
            failure_action: Some(ServiceSpecUpdateConfigFailureActionEnum::ROLLBACK),
            order: Some(ServiceSpecUpdateConfigOrderEnum::START_FIRST),
            ..Default::default()
        }),
        rollback_config: Some(ServiceSpecRollbackConfig {
            parallelism: Some(1),
            delay: Some(ROLLOUT_DELAY_NANOS),
            failure_action: Some(ServiceSpecRollbackConfigFailureActionEnum::PAUSE),
            order: Some(ServiceSpecRollbackConfigOrderEnum::START_FIRST),
            ..Default::default()
        }),
        endpoint_spec: Some(EndpointSpec {
            ports: Some(config.ports.iter().map(build_port).collect()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Bumps `ForceUpdate` so Swarm replaces every task even when nothing changed.
pub(crate) fn bump_force_update(spec: &mut ServiceSpec, current: Option<&ServiceSpec>) {
    let previous = current
        .and_then(|s| s.task_template.as_ref())
        .and_then(|t| t.force_update)
        .unwrap_or(0);
    spec.task_template.get_or_insert_with(Default::default).force_update = Some(previous + 1);
}

/// Overlays the supplied fields of `patch` onto an existing spec.
pub(crate) fn apply_patch(spec: &mut ServiceSpec, patch: &DeploymentPatch) {
    let current = spec.clone();
    let task = spec.task_template.get_or_insert_with(Default::default);
    let container = task.container_spec.get_or_insert_with(Default::default);
    if let Some(image) = &patch.image {
        container.image = Some(image.clone());
    }
    if let Some(env) = &patch.env {
        container.env = Some(format_env(env));
    }
    if let Some(command) = &patch.command {
        container.command = Some(command.clone());
    }
    if let Some(args) = &patch.args {
        container.args = Some(args.clone());
    }
    if let Some(replicas) = patch.replicas {
        spec.mode = Some(replicated(replicas));
    }
    bump_force_update(spec, Some(&current));
}
