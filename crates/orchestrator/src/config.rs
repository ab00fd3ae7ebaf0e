use std::path::{Path, PathBuf};

use common::api::ServerConfig;
use serde::Deserialize;

use crate::exec::{SshHostKeyChecking, SshOptions};
use crate::{DEFAULT_DOCKER_NETWORK, DEFAULT_NAMESPACE};

pub const ENV_PREFIX: &str = "DOKPLOY_ORCHESTRATOR";

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Kubernetes namespace used when neither request nor server names one.
    pub default_namespace: String,
    /// Overlay network every Swarm service joins.
    pub docker_network: String,
    pub docker_timeout_secs: u64,
    /// Swarm log polling period.
    pub log_poll_interval_ms: u64,
    pub log_buffer: usize,
    pub ssh_connect_timeout_secs: u64,
    pub ssh_host_key_checking: SshHostKeyChecking,
    /// JSON or YAML list of servers seeding the in-memory store.
    #[serde(default)]
    pub servers_file: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            docker_network: DEFAULT_DOCKER_NETWORK.to_string(),
            docker_timeout_secs: 120,
            log_poll_interval_ms: 1_000,
            log_buffer: crate::logs::DEFAULT_LOG_BUFFER,
            ssh_connect_timeout_secs: 10,
            ssh_host_key_checking: SshHostKeyChecking::AcceptNew,
            servers_file: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_namespace.trim().is_empty() {
            anyhow::bail!("default_namespace cannot be empty");
        }
        if self.docker_network.trim().is_empty() {
            anyhow::bail!("docker_network cannot be empty");
        }
        if self.docker_timeout_secs == 0 {
            anyhow::bail!("docker_timeout_secs must be > 0");
        }
        if self.log_poll_interval_ms == 0 {
            anyhow::bail!("log_poll_interval_ms must be > 0");
        }
        if self.log_buffer == 0 {
            anyhow::bail!("log_buffer must be > 0");
        }
        Ok(())
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout_secs: self.ssh_connect_timeout_secs,
            host_key_checking: self.ssh_host_key_checking,
        }
    }
}

pub fn load() -> anyhow::Result<OrchestratorConfig> {
    load_from(Path::new("orchestrator"))
}

/// Loads `<base>.{toml,yaml,json}` when present, then `DOKPLOY_ORCHESTRATOR_*`.
pub fn load_from(base: &Path) -> anyhow::Result<OrchestratorConfig> {
    let defaults = OrchestratorConfig::default();
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(&base.to_string_lossy()).required(false))
        .set_default("default_namespace", defaults.default_namespace)?
        .set_default("docker_network", defaults.docker_network)?
        .set_default("docker_timeout_secs", defaults.docker_timeout_secs)?
        .set_default("log_poll_interval_ms", defaults.log_poll_interval_ms)?
        .set_default("log_buffer", defaults.log_buffer as u64)?
        .set_default("ssh_connect_timeout_secs", defaults.ssh_connect_timeout_secs)?
        .set_default("ssh_host_key_checking", "accept-new")?
        .set_default("servers_file", Option::<String>::None)?
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        )
        .build()?;

    let app: OrchestratorConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Reads the server list used by the CLI's in-memory store.
pub fn load_servers(path: &Path) -> anyhow::Result<Vec<ServerConfig>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read servers file {}: {}", path.display(), err))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let servers = if is_json {
        serde_json::from_str(&raw)?
    } else {
        serde_yaml::from_str(&raw)?
    };
    Ok(servers)
}
