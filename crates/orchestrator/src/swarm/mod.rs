//! Docker Swarm backend.
//!
//! Service CRUD goes through the Engine API (bollard); scale, delete, rollback,
//! restart and logs shell out to the `docker` CLI on the manager, locally or
//! over `ssh`.

pub(crate) mod spec;
pub(crate) mod status;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{
    models::{
        LocalNodeState, Service as SwarmService, ServiceSpec, Task, TaskSpec,
        TaskSpecContainerSpec,
    },
    query_parameters::{
        InspectServiceOptions, ListServicesOptions, ListTasksOptions, StatsOptionsBuilder,
        UpdateServiceOptions,
    },
    Docker, API_DEFAULT_VERSION,
};
use chrono::{SecondsFormat, Utc};
use common::api::{
    Deployment, DeploymentConfig, DeploymentEvent, DeploymentPatch, HealthDetails, HealthStatus,
    Ingress, IngressConfig, IngressPath, IngressRule, LogOptions, OrchestratorType, PathType,
    ResourceMetrics, ServerConfig, Service, ServiceConfig, ServicePatch, ServiceType,
};
use futures_util::{StreamExt, TryStreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::adapter::OrchestratorAdapter;
use crate::config::OrchestratorConfig;
use crate::error::{is_docker_not_found, OrchestratorError, Result};
use crate::exec::{
    sh_quote, CommandExecutor, CommandOutput, DynCommandExecutor, ShellExecutor, SshOptions,
};
use crate::logs::{self, LogStream};
use crate::telemetry;

use self::spec::{
    apply_patch, build_service_spec, bump_force_update, endpoint_ports, managed_labels,
    network_attachment, replicated,
};
use self::status::{
    derive_deployment, running_container, stats_to_metrics, task_events, to_service,
};

const BACKEND: &str = "swarm";
/// Image backing services created without an application.
const PLACEHOLDER_IMAGE: &str = "nginx:alpine";

#[derive(Debug, Clone)]
pub struct SwarmSettings {
    pub network: String,
    pub docker_timeout_secs: u64,
    pub log_poll_interval: Duration,
    pub log_buffer: usize,
    pub ssh: SshOptions,
}

impl From<&OrchestratorConfig> for SwarmSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            network: config.docker_network.clone(),
            docker_timeout_secs: config.docker_timeout_secs,
            log_poll_interval: Duration::from_millis(config.log_poll_interval_ms),
            log_buffer: config.log_buffer,
            ssh: config.ssh_options(),
        }
    }
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

pub struct SwarmAdapter {
    server: ServerConfig,
    settings: SwarmSettings,
    docker: OnceCell<Docker>,
    executor: DynCommandExecutor,
}

impl SwarmAdapter {
    /// The Engine client is built on first use.
    pub fn new(server: ServerConfig, config: &OrchestratorConfig) -> Self {
        let settings = SwarmSettings::from(config);
        let executor = Arc::new(ShellExecutor::for_server(&server, settings.ssh.clone()));
        Self {
            server,
            settings,
            docker: OnceCell::new(),
            executor,
        }
    }

    pub fn from_parts(
        server: ServerConfig,
        settings: SwarmSettings,
        docker: Docker,
        executor: DynCommandExecutor,
    ) -> Self {
        Self {
            server,
            settings,
            docker: OnceCell::new_with(Some(docker)),
            executor,
        }
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    async fn docker(&self) -> Result<&Docker> {
        self.docker
            .get_or_try_init(|| async {
                connect_docker(&self.server, self.settings.docker_timeout_secs)
            })
            .await
    }

    async fn inspect(&self, docker: &Docker, name: &str) -> Result<Option<SwarmService>> {
        match docker
            .inspect_service(name, None::<InspectServiceOptions>)
            .await
        {
            Ok(service) => Ok(Some(service)),
            Err(err) if is_docker_not_found(&err) => Ok(None),
            Err(err) => Err(OrchestratorError::docker("inspect_service", err)),
        }
    }

    async fn inspect_existing(&self, docker: &Docker, name: &str) -> Result<SwarmService> {
        self.inspect(docker, name)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "service",
                name: name.to_string(),
            })
    }

    async fn tasks(&self, docker: &Docker, name: &str) -> Result<Vec<Task>> {
        let filters = HashMap::from([("service".to_string(), vec![name.to_string()])]);
        docker
            .list_tasks(Some(ListTasksOptions {
                filters: Some(filters),
            }))
            .await
            .map_err(|err| OrchestratorError::docker("list_tasks", err))
    }

    async fn push_update(
        &self,
        docker: &Docker,
        name: &str,
        current: &SwarmService,
        spec: ServiceSpec,
    ) -> Result<()> {
        let index = current
            .version
            .as_ref()
            .and_then(|v| v.index)
            .unwrap_or_default();
        let version = i32::try_from(index).map_err(|_| {
            OrchestratorError::InvalidInput(format!(
                "service {name} version {index} is out of range for an update"
            ))
        })?;
        let options = UpdateServiceOptions {
            version,
            ..Default::default()
        };
        docker
            .update_service(name, spec, options, None)
            .await
            .map_err(|err| OrchestratorError::docker("update_service", err))?;
        Ok(())
    }

    async fn run_cli(&self, script: &str) -> Result<CommandOutput> {
        debug!(server = %self.server.cache_key(), script, "running docker cli");
        self.executor.run(script).await
    }

    fn api_endpoint(&self) -> String {
        if self.server.is_local() {
            "unix:///var/run/docker.sock".to_string()
        } else {
            docker_ssh_url(&self.server)
        }
    }
}

fn docker_ssh_url(server: &ServerConfig) -> String {
    format!(
        "ssh://{}@{}:{}",
        server.username, server.ip_address, server.port
    )
}

fn connect_docker(server: &ServerConfig, timeout_secs: u64) -> Result<Docker> {
    let docker = if server.is_local() {
        Docker::connect_with_defaults()
            .map(|docker| docker.with_timeout(Duration::from_secs(timeout_secs)))
    } else {
        Docker::connect_with_ssh(&docker_ssh_url(server), timeout_secs, API_DEFAULT_VERSION)
    };
    docker.map_err(|err| OrchestratorError::Connection {
        context: "connect",
        source: err.into(),
    })
}

/// `docker service logs` invocation with stderr folded into stdout.
fn logs_command(name: &str, options: &LogOptions) -> String {
    let mut cmd = format!("docker service logs {}", sh_quote(name));
    if let Some(tail) = options.tail_lines {
        cmd.push_str(&format!(" --tail {tail}"));
    }
    if let Some(seconds) = options.since_seconds {
        cmd.push_str(&format!(" --since {seconds}s"));
    } else if let Some(since) = options.since_time {
        cmd.push_str(&format!(
            " --since {}",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    if options.timestamps {
        cmd.push_str(" --timestamps");
    }
    cmd.push_str(" 2>&1");
    cmd
}

fn split_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

async fn fetch_logs(executor: &dyn CommandExecutor, script: &str) -> Result<Vec<String>> {
    let output = executor.run(script).await?;
    if !output.success() {
        return Err(OrchestratorError::command(script, output.stdout.trim()));
    }
    Ok(split_lines(&output.stdout))
}

fn is_missing_service(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("no such service")
}

fn cli_failure(script: &str, output: &CommandOutput) -> OrchestratorError {
    let message = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    OrchestratorError::command(script, message)
}

#[async_trait]
impl OrchestratorAdapter for SwarmAdapter {
    fn orchestrator_type(&self) -> OrchestratorType {
        OrchestratorType::Swarm
    }

    async fn detect(&self) -> OrchestratorType {
        OrchestratorType::Swarm
    }

    async fn health_check(&self) -> HealthStatus {
        let docker = match self.docker().await {
            Ok(docker) => docker,
            Err(err) => return HealthStatus::unhealthy(err.to_string()),
        };
        match docker.info().await {
            Ok(info) => {
                let swarm = info.swarm.as_ref();
                let active = swarm.and_then(|s| s.local_node_state) == Some(LocalNodeState::ACTIVE);
                let message = if active {
                    "Docker Swarm is active"
                } else {
                    "Docker Swarm is not active on this node"
                };
                HealthStatus {
                    healthy: active,
                    message: message.to_string(),
                    details: Some(HealthDetails {
                        version: info.server_version.clone(),
                        nodes: swarm.and_then(|s| s.nodes),
                        api_endpoint: Some(self.api_endpoint()),
                        last_check: Some(Utc::now()),
                    }),
                }
            }
            Err(err) => {
                let err = OrchestratorError::docker("info", err);
                warn!(server = %self.server.cache_key(), error = %err, "swarm health check failed");
                HealthStatus::unhealthy(err.to_string())
            }
        }
    }

    async fn get_version(&self) -> Result<String> {
        let docker = self.docker().await?;
        let info = docker
            .info()
            .await
            .map_err(|err| OrchestratorError::docker("info", err))?;
        Ok(info.server_version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn deploy_application(&self, config: &DeploymentConfig) -> Result<Deployment> {
        telemetry::timed(BACKEND, "deploy_application", async {
            let docker = self.docker().await?;
            let mut spec = build_service_spec(config, &self.settings.network);

            let deployed = match self.inspect(docker, &config.name).await? {
                Some(current) => {
                    bump_force_update(&mut spec, current.spec.as_ref());
                    self.push_update(docker, &config.name, &current, spec.clone())
                        .await?;
                    info!(service = %config.name, image = %config.image, "updated swarm service");
                    SwarmService {
                        spec: Some(spec),
                        ..current
                    }
                }
                None => {
                    let created = docker
                        .create_service(spec.clone(), None)
                        .await
                        .map_err(|err| OrchestratorError::docker("create_service", err))?;
                    info!(service = %config.name, image = %config.image, "created swarm service");
                    SwarmService {
                        id: created.id,
                        spec: Some(spec),
                        ..Default::default()
                    }
                }
            };

            let tasks = self.tasks(docker, &config.name).await?;
            Ok(derive_deployment(&config.name, &deployed, &tasks))
        })
        .await
    }

    async fn get_deployment(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<Option<Deployment>> {
        let docker = self.docker().await?;
        let Some(service) = self.inspect(docker, name).await? else {
            return Ok(None);
        };
        let tasks = self.tasks(docker, name).await?;
        Ok(Some(derive_deployment(name, &service, &tasks)))
    }

    async fn scale_application(
        &self,
        name: &str,
        replicas: u32,
        _namespace: Option<&str>,
    ) -> Result<()> {
        telemetry::timed(BACKEND, "scale_application", async {
            let script = format!("docker service scale {}={replicas}", sh_quote(name));
            let output = self.run_cli(&script).await?;
            let stderr_failed =
                !output.stderr.trim().is_empty() && !output.stdout.contains("converged");
            if !output.success() || stderr_failed {
                return Err(cli_failure(&script, &output));
            }
            info!(service = %name, replicas, "scaled swarm service");
            Ok(())
        })
        .await
    }

    async fn update_application(
        &self,
        name: &str,
        patch: &DeploymentPatch,
        _namespace: Option<&str>,
    ) -> Result<Deployment> {
        telemetry::timed(BACKEND, "update_application", async {
            let docker = self.docker().await?;
            let current = self.inspect_existing(docker, name).await?;
            let mut spec = current.spec.clone().unwrap_or_default();
            apply_patch(&mut spec, patch);
            self.push_update(docker, name, &current, spec.clone()).await?;

            let tasks = self.tasks(docker, name).await?;
            let updated = SwarmService {
                spec: Some(spec),
                ..current
            };
            Ok(derive_deployment(name, &updated, &tasks))
        })
        .await
    }

    async fn delete_application(&self, name: &str, _namespace: Option<&str>) -> Result<()> {
        telemetry::timed(BACKEND, "delete_application", async {
            let script = format!("docker service rm {}", sh_quote(name));
            let output = self.run_cli(&script).await?;
            if is_missing_service(&output.stderr) {
                debug!(service = %name, "service already removed");
                return Ok(());
            }
            if !output.success() || !output.stderr.trim().is_empty() {
                return Err(cli_failure(&script, &output));
            }
            info!(service = %name, "removed swarm service");
            Ok(())
        })
        .await
    }

    async fn rollback_application(
        &self,
        name: &str,
        revision: Option<i64>,
        _namespace: Option<&str>,
    ) -> Result<()> {
        if let Some(revision) = revision {
            debug!(service = %name, revision, "swarm keeps one previous spec; revision ignored");
        }
        telemetry::timed(BACKEND, "rollback_application", async {
            let script = format!("docker service rollback {}", sh_quote(name));
            let output = self.run_cli(&script).await?;
            if !output.success() || !output.stderr.trim().is_empty() {
                return Err(cli_failure(&script, &output));
            }
            info!(service = %name, "rolled back swarm service");
            Ok(())
        })
        .await
    }

    async fn restart_application(&self, name: &str, _namespace: Option<&str>) -> Result<()> {
        telemetry::timed(BACKEND, "restart_application", async {
            let script = format!("docker service update --force --detach {}", sh_quote(name));
            let output = self.run_cli(&script).await?;
            if !output.success() {
                return Err(cli_failure(&script, &output));
            }
            info!(service = %name, "forced swarm service update");
            Ok(())
        })
        .await
    }

    async fn list_deployments(
        &self,
        _namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Deployment>> {
        let docker = self.docker().await?;
        let filters = label_selector
            .map(|selector| HashMap::from([("label".to_string(), vec![selector.to_string()])]));
        let services = docker
            .list_services(Some(ListServicesOptions {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|err| OrchestratorError::docker("list_services", err))?;

        let mut deployments = Vec::with_capacity(services.len());
        for service in services {
            let Some(name) = service.spec.as_ref().and_then(|s| s.name.clone()) else {
                continue;
            };
            match self.tasks(docker, &name).await {
                Ok(tasks) => deployments.push(derive_deployment(&name, &service, &tasks)),
                Err(err) => warn!(service = %name, error = %err, "skipping service"),
            }
        }
        Ok(deployments)
    }

    async fn create_service(&self, config: &ServiceConfig) -> Result<Service> {
        let docker = self.docker().await?;
        let spec = ServiceSpec {
            name: Some(config.name.clone()),
            labels: Some(managed_labels(&config.selector)),
            task_template: Some(TaskSpec {
                container_spec: Some(TaskSpecContainerSpec {
                    image: Some(PLACEHOLDER_IMAGE.to_string()),
                    labels: Some(config.selector.clone().into_iter().collect()),
                    ..Default::default()
                }),
                networks: Some(network_attachment(&self.settings.network)),
                ..Default::default()
            }),
            mode: Some(replicated(1)),
            endpoint_spec: Some(endpoint_ports(&config.ports)),
            ..Default::default()
        };

        match docker.create_service(spec, None).await {
            Ok(_) => info!(service = %config.name, "created swarm service"),
            Err(err) => {
                let err = OrchestratorError::docker("create_service", err);
                if !err.is_conflict() {
                    return Err(err);
                }
                debug!(service = %config.name, "service already exists");
            }
        }

        Ok(Service {
            name: config.name.clone(),
            namespace: None,
            service_type: ServiceType::ClusterIp,
            cluster_ip: None,
            external_ips: Vec::new(),
            ports: config.ports.clone(),
            selector: config.selector.clone(),
        })
    }

    async fn get_service(&self, name: &str, _namespace: Option<&str>) -> Result<Option<Service>> {
        let docker = self.docker().await?;
        Ok(self
            .inspect(docker, name)
            .await?
            .map(|service| to_service(name, &service)))
    }

    async fn update_service(
        &self,
        name: &str,
        patch: &ServicePatch,
        _namespace: Option<&str>,
    ) -> Result<Service> {
        let docker = self.docker().await?;
        let current = self.inspect_existing(docker, name).await?;
        let mut spec = current.spec.clone().unwrap_or_default();
        if let Some(ports) = &patch.ports {
            spec.endpoint_spec = Some(endpoint_ports(ports));
        }
        if let Some(selector) = &patch.selector {
            let container = spec
                .task_template
                .get_or_insert_with(Default::default)
                .container_spec
                .get_or_insert_with(Default::default);
            container.labels = Some(selector.clone().into_iter().collect());
        }
        self.push_update(docker, name, &current, spec.clone()).await?;

        let updated = SwarmService {
            spec: Some(spec),
            endpoint: None,
            ..current
        };
        Ok(to_service(name, &updated))
    }

    async fn delete_service(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        self.delete_application(name, namespace).await
    }

    async fn configure_ingress(&self, config: &IngressConfig) -> Result<Ingress> {
        // Swarm routing lives in Traefik's file provider, managed elsewhere.
        let path = config
            .path_prefix
            .clone()
            .unwrap_or_else(|| "/".to_string());
        Ok(Ingress {
            name: config.name.clone(),
            namespace: config.namespace.clone(),
            hosts: vec![config.domain.clone()],
            tls: config.ssl,
            rules: vec![IngressRule {
                host: config.domain.clone(),
                paths: vec![IngressPath {
                    path,
                    path_type: PathType::Prefix,
                    service_name: config.service_name.clone(),
                    service_port: config.service_port,
                }],
            }],
        })
    }

    async fn get_ingress(&self, _name: &str, _namespace: Option<&str>) -> Result<Option<Ingress>> {
        Ok(None)
    }

    async fn delete_ingress(&self, _name: &str, _namespace: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn get_metrics(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<Option<ResourceMetrics>> {
        let docker = self.docker().await?;
        let tasks = self.tasks(docker, name).await?;
        let Some(container_id) = running_container(&tasks) else {
            return Ok(None);
        };

        let mut stream = docker
            .stats(
                &container_id,
                Some(StatsOptionsBuilder::default().stream(false).build()),
            )
            .take(1);
        let stats = stream
            .try_next()
            .await
            .map_err(|err| OrchestratorError::docker("container_stats", err))?;
        Ok(stats.map(|stats| stats_to_metrics(name, &container_id, &stats)))
    }

    async fn get_logs(
        &self,
        name: &str,
        options: &LogOptions,
        _namespace: Option<&str>,
    ) -> Result<Vec<String>> {
        fetch_logs(self.executor.as_ref(), &logs_command(name, options)).await
    }

    async fn stream_logs(
        &self,
        name: &str,
        options: &LogOptions,
        _namespace: Option<&str>,
    ) -> Result<LogStream> {
        let (sink, stream) = logs::channel(self.settings.log_buffer);
        let executor = self.executor.clone();
        let name = name.to_string();
        let mut options = options.clone();
        let period = self.settings.log_poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = sink.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let polled_at = Utc::now();
                match fetch_logs(executor.as_ref(), &logs_command(&name, &options)).await {
                    Ok(lines) => {
                        for line in lines {
                            if !sink.send(line).await {
                                debug!(service = %name, "log consumer went away");
                                return;
                            }
                        }
                    }
                    Err(err) => warn!(service = %name, error = %err, "log poll failed"),
                }
                options = LogOptions {
                    tail_lines: None,
                    since_seconds: None,
                    since_time: Some(polled_at),
                    ..options
                };
            }
            debug!(service = %name, "log stream cancelled");
        });

        Ok(stream)
    }

    async fn get_events(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<Vec<DeploymentEvent>> {
        let docker = self.docker().await?;
        let tasks = self.tasks(docker, name).await?;
        Ok(task_events(&tasks))
    }
}
