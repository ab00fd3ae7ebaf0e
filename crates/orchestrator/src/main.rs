use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use common::api::{DeploymentConfig, LogOptions, OrchestratorType, ServerConfig};
use orchestrator::config;
use orchestrator::store::{InMemoryServerStore, ServerStore};
use orchestrator::{telemetry, KubernetesAdapter, OrchestratorFactory};
use serde::Serialize;
use tokio::signal;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(
    name = "dokploy-orchestrator",
    version,
    about = "Drive Docker Swarm and Kubernetes servers through one adapter interface"
)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Server id from the servers file; the local host when omitted.
    #[arg(long, global = true, env = "DOKPLOY_ORCHESTRATOR_SERVER")]
    server: Option<String>,

    /// JSON or YAML list of server records (overrides `servers_file`).
    #[arg(long, global = true)]
    servers_file: Option<PathBuf>,

    /// Kubernetes namespace for namespaced operations.
    #[arg(long, short = 'n', global = true)]
    namespace: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Detect which orchestrator the server runs.
    Detect,
    /// Check backend health.
    Health,
    /// Probe optional Kubernetes features.
    Capabilities,
    /// Deploy an application from a JSON or YAML file.
    Deploy {
        /// Deployment config file.
        #[arg(long, short = 'f')]
        file: PathBuf,
    },
    /// Show one deployment.
    Status { name: String },
    /// List deployments.
    List {
        /// Label selector, e.g. `app=web`.
        #[arg(long, short = 'l')]
        selector: Option<String>,
    },
    /// Set the replica count.
    Scale { name: String, replicas: u32 },
    /// Restart every replica.
    Restart { name: String },
    /// Roll back to a previous revision.
    Rollback {
        name: String,
        /// Revision to restore; the previous one when omitted.
        #[arg(long)]
        revision: Option<i64>,
    },
    /// Delete an application and its dependents.
    Delete { name: String },
    /// Print application logs.
    Logs {
        name: String,
        /// Keep streaming until interrupted.
        #[arg(long)]
        follow: bool,
        /// Number of trailing lines.
        #[arg(long)]
        tail: Option<i64>,
        /// Prefix lines with timestamps.
        #[arg(long)]
        timestamps: bool,
    },
    /// Show recent events.
    Events { name: String },
    /// Show current resource usage.
    Metrics { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = config::load()?;
    if let Some(path) = cli.globals.servers_file.clone() {
        cfg.servers_file = Some(path);
    }

    let store = match &cfg.servers_file {
        Some(path) => InMemoryServerStore::with_servers(config::load_servers(path)?),
        None => InMemoryServerStore::new(),
    };
    let server = resolve_server(&store, cli.globals.server.as_deref()).await?;
    debug!(server = %server.cache_key(), "resolved server");
    let factory = OrchestratorFactory::new(Arc::new(store), cfg);
    let namespace = cli.globals.namespace.as_deref();

    match cli.command {
        Commands::Detect => {
            let detected = factory.detect_orchestrator(&server).await;
            print_json(&serde_json::json!({ "orchestratorType": detected }))
        }
        Commands::Health => {
            let adapter = factory.create(&server, false).await?;
            print_json(&adapter.health_check().await)
        }
        Commands::Capabilities => {
            let is_kubernetes = server.orchestrator_type == Some(OrchestratorType::Kubernetes)
                || server.has_kubernetes_fields();
            if !is_kubernetes {
                bail!("server {} is not a Kubernetes cluster", server.cache_key());
            }
            let adapter = KubernetesAdapter::connect(&server, factory.config()).await?;
            print_json(&factory.detect_k8s_capabilities(&adapter).await)
        }
        Commands::Deploy { file } => {
            let mut deployment = read_deployment(&file)?;
            if deployment.namespace.is_none() {
                deployment.namespace = namespace.map(str::to_string);
            }
            let adapter = factory.create(&server, false).await?;
            let deployed = adapter.deploy_application(&deployment).await?;
            info!(name = %deployed.name, status = ?deployed.status, "deployed");
            print_json(&deployed)
        }
        Commands::Status { name } => {
            let adapter = factory.create(&server, false).await?;
            match adapter.get_deployment(&name, namespace).await? {
                Some(deployment) => print_json(&deployment),
                None => bail!("deployment {name} not found"),
            }
        }
        Commands::List { selector } => {
            let adapter = factory.create(&server, false).await?;
            print_json(
                &adapter
                    .list_deployments(namespace, selector.as_deref())
                    .await?,
            )
        }
        Commands::Scale { name, replicas } => {
            let adapter = factory.create(&server, false).await?;
            adapter.scale_application(&name, replicas, namespace).await?;
            print_json(&serde_json::json!({ "name": name, "replicas": replicas }))
        }
        Commands::Restart { name } => {
            let adapter = factory.create(&server, false).await?;
            adapter.restart_application(&name, namespace).await?;
            print_json(&serde_json::json!({ "name": name, "restarted": true }))
        }
        Commands::Rollback { name, revision } => {
            let adapter = factory.create(&server, false).await?;
            adapter
                .rollback_application(&name, revision, namespace)
                .await?;
            print_json(&serde_json::json!({ "name": name, "rolledBack": true }))
        }
        Commands::Delete { name } => {
            let adapter = factory.create(&server, false).await?;
            adapter.delete_application(&name, namespace).await?;
            print_json(&serde_json::json!({ "name": name, "deleted": true }))
        }
        Commands::Logs {
            name,
            follow,
            tail,
            timestamps,
        } => {
            let adapter = factory.create(&server, false).await?;
            let options = LogOptions {
                follow,
                tail_lines: tail,
                timestamps,
                ..Default::default()
            };
            if !follow {
                for line in adapter.get_logs(&name, &options, namespace).await? {
                    println!("{line}");
                }
                return Ok(());
            }

            let mut stream = adapter.stream_logs(&name, &options, namespace).await?;
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        stream.cancel();
                        break;
                    }
                    line = stream.next_line() => match line {
                        Some(line) => println!("{line}"),
                        None => break,
                    },
                }
            }
            Ok(())
        }
        Commands::Events { name } => {
            let adapter = factory.create(&server, false).await?;
            print_json(&adapter.get_events(&name, namespace).await?)
        }
        Commands::Metrics { name } => {
            let adapter = factory.create(&server, false).await?;
            match adapter.get_metrics(&name, namespace).await? {
                Some(metrics) => print_json(&metrics),
                None => bail!("no metrics available for {name}"),
            }
        }
    }
}

async fn resolve_server(
    store: &InMemoryServerStore,
    server_id: Option<&str>,
) -> anyhow::Result<ServerConfig> {
    match server_id.filter(|id| !id.is_empty()) {
        None => Ok(ServerConfig::local()),
        Some(id) => store
            .find_server(id)
            .await?
            .with_context(|| format!("Server not found: {id}")),
    }
}

fn read_deployment(path: &Path) -> anyhow::Result<DeploymentConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        serde_json::from_str(&raw)?
    } else {
        serde_yaml::from_str(&raw)?
    };
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
