use bollard::models::{
    ContainerCpuStats, ContainerStatsResponse, EndpointPortConfigProtocolEnum,
    Service as SwarmService, ServiceUpdateStatusStateEnum, Task, TaskState,
};
use chrono::{DateTime, Utc};
use common::api::{
    ContainerMetrics, CpuUsage, Deployment, DeploymentEvent, DeploymentStatus, EventType,
    MemoryUsage, Protocol, ReplicaCounts, ResourceMetrics, Service, ServicePort, ServiceType,
};

pub(crate) fn parse_timestamp(value: Option<&String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn task_state(task: &Task) -> Option<TaskState> {
    task.status.as_ref().and_then(|s| s.state)
}

fn task_timestamp(task: &Task) -> Option<DateTime<Utc>> {
    parse_timestamp(task.status.as_ref().and_then(|s| s.timestamp.as_ref()))
}

fn is_running(task: &Task) -> bool {
    task_state(task) == Some(TaskState::RUNNING)
        && task.desired_state.is_none_or(|d| d == TaskState::RUNNING)
}

/// Declared replica count; replicated services without a count run one task.
pub(crate) fn desired_replicas(service: &SwarmService) -> u32 {
    service
        .spec
        .as_ref()
        .and_then(|s| s.mode.as_ref())
        .and_then(|m| m.replicated.as_ref())
        .and_then(|r| r.replicas)
        .map(|r| r.max(0) as u32)
        .unwrap_or(1)
}

fn latest_task(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().max_by_key(|t| task_timestamp(t))
}

fn is_updating(service: &SwarmService) -> bool {
    matches!(
        service.update_status.as_ref().and_then(|u| u.state),
        Some(ServiceUpdateStatusStateEnum::UPDATING | ServiceUpdateStatusStateEnum::ROLLBACK_STARTED)
    )
}

pub(crate) fn derive_status(service: &SwarmService, tasks: &[Task]) -> DeploymentStatus {
    let running = tasks.iter().filter(|t| is_running(t)).count() as u32;
    let desired = desired_replicas(service);
    let latest_failed = latest_task(tasks)
        .and_then(task_state)
        .is_some_and(|s| matches!(s, TaskState::FAILED | TaskState::REJECTED));

    if running == 0 && latest_failed {
        DeploymentStatus::Failed
    } else if is_updating(service) {
        DeploymentStatus::Updating
    } else if running == 0 {
        DeploymentStatus::Pending
    } else if running < desired {
        DeploymentStatus::Scaling
    } else {
        DeploymentStatus::Running
    }
}

/// Builds the normalized view from a service and its task list.
pub(crate) fn derive_deployment(name: &str, service: &SwarmService, tasks: &[Task]) -> Deployment {
    let running = tasks.iter().filter(|t| is_running(t)).count() as u32;
    let spec = service.spec.as_ref();
    let image = spec
        .and_then(|s| s.task_template.as_ref())
        .and_then(|t| t.container_spec.as_ref())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    Deployment {
        name: spec.and_then(|s| s.name.clone()).unwrap_or_else(|| name.to_string()),
        namespace: None,
        status: derive_status(service, tasks),
        replicas: ReplicaCounts {
            desired: desired_replicas(service),
            ready: running,
            available: running,
            unavailable: None,
        },
        image,
        created_at: parse_timestamp(service.created_at.as_ref()),
        updated_at: parse_timestamp(service.updated_at.as_ref()),
        conditions: Vec::new(),
    }
}

pub(crate) fn task_events(tasks: &[Task]) -> Vec<DeploymentEvent> {
    tasks
        .iter()
        .map(|task| {
            let state = task_state(task);
            let kind = match state {
                Some(TaskState::FAILED | TaskState::REJECTED) => EventType::Warning,
                _ => EventType::Normal,
            };
            let status = task.status.as_ref();
            let message = status
                .and_then(|s| s.err.clone().or_else(|| s.message.clone()))
                .unwrap_or_default();
            let at = task_timestamp(task).unwrap_or_else(Utc::now);
            DeploymentEvent {
                kind,
                reason: state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
                message,
                count: 1,
                first_timestamp: at,
                last_timestamp: at,
            }
        })
        .collect()
}

/// First running task's container id.
pub(crate) fn running_container(tasks: &[Task]) -> Option<String> {
    tasks
        .iter()
        .filter(|t| is_running(t))
        .find_map(|t| t.status.as_ref()?.container_status.as_ref()?.container_id.clone())
}

pub(crate) fn to_service(name: &str, service: &SwarmService) -> Service {
    let spec = service.spec.as_ref();
    let ports = service
        .endpoint
        .as_ref()
        .and_then(|e| e.ports.clone())
        .or_else(|| spec.and_then(|s| s.endpoint_spec.as_ref()).and_then(|e| e.ports.clone()))
        .unwrap_or_default()
        .into_iter()
        .map(|p| ServicePort {
            name: p.name,
            port: p.published_port.unwrap_or(0) as u16,
            target_port: p.target_port.unwrap_or(0) as u16,
            protocol: match p.protocol {
                Some(EndpointPortConfigProtocolEnum::UDP) => Protocol::Udp,
                _ => Protocol::Tcp,
            },
            node_port: None,
        })
        .collect();
    let selector = spec
        .and_then(|s| s.task_template.as_ref())
        .and_then(|t| t.container_spec.as_ref())
        .and_then(|c| c.labels.clone())
        .unwrap_or_default()
        .into_iter()
        .collect();

    Service {
        name: spec.and_then(|s| s.name.clone()).unwrap_or_else(|| name.to_string()),
        namespace: None,
        service_type: ServiceType::ClusterIp,
        cluster_ip: None,
        external_ips: Vec::new(),
        ports,
        selector,
    }
}

fn total_usage(stats: &ContainerCpuStats) -> u64 {
    stats
        .cpu_usage
        .as_ref()
        .and_then(|usage| usage.total_usage)
        .unwrap_or(0)
}

/// `cpu_delta / system_delta * online_cpus * 100` between the engine's two
/// samples. 0 when there is no previous system sample to diff against.
pub(crate) fn cpu_percent(stats: &ContainerStatsResponse) -> f64 {
    let (Some(cpu), Some(pre)) = (stats.cpu_stats.as_ref(), stats.precpu_stats.as_ref()) else {
        return 0.0;
    };
    let (Some(system), Some(pre_system)) = (cpu.system_cpu_usage, pre.system_cpu_usage) else {
        return 0.0;
    };
    let system_delta = system.saturating_sub(pre_system);
    if system_delta == 0 {
        return 0.0;
    }

    let cpu_delta = total_usage(cpu).saturating_sub(total_usage(pre));
    let online_cpus = cpu
        .online_cpus
        .filter(|n| *n > 0)
        .or_else(|| {
            let per_cpu = cpu.cpu_usage.as_ref()?.percpu_usage.as_ref()?;
            u32::try_from(per_cpu.len()).ok().filter(|n| *n > 0)
        })
        .unwrap_or(1);

    cpu_delta as f64 / system_delta as f64 * f64::from(online_cpus) * 100.0
}

/// Single stats sample mapped onto the shared metrics shape.
pub(crate) fn stats_to_metrics(
    name: &str,
    container_id: &str,
    stats: &ContainerStatsResponse,
) -> ResourceMetrics {
    let cpu_percent = cpu_percent(stats);
    let memory = stats.memory_stats.as_ref();
    let usage = memory.and_then(|m| m.usage).unwrap_or(0);
    let limit = memory.and_then(|m| m.limit).filter(|l| *l > 0).unwrap_or(1);
    let memory_percent = usage as f64 / limit as f64 * 100.0;
    let total_usage = stats
        .cpu_stats
        .as_ref()
        .and_then(|c| c.cpu_usage.as_ref())
        .and_then(|u| u.total_usage);
    let short_id: String = container_id.chars().take(12).collect();

    ResourceMetrics {
        name: name.to_string(),
        namespace: None,
        timestamp: Utc::now(),
        containers: vec![ContainerMetrics {
            name: short_id,
            cpu: CpuUsage {
                usage: format!("{cpu_percent:.2}%"),
                usage_nano_cores: total_usage,
            },
            memory: MemoryUsage {
                usage: format!("{:.2}Mi", usage as f64 / 1024.0 / 1024.0),
                usage_bytes: Some(usage),
                working_set: None,
            },
        }],
        total_cpu: format!("{cpu_percent:.2}%"),
        total_memory: format!("{memory_percent:.2}%"),
    }
}
