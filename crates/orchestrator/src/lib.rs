pub mod adapter;
pub mod config;
pub mod error;
pub mod exec;
pub mod factory;
pub mod kubernetes;
pub mod logs;
pub mod quantity;
pub mod store;
pub mod swarm;
pub mod telemetry;
pub mod traefik;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapter::{
    CustomResourceCapable, DynOrchestratorAdapter, HpaCapable, NamespaceCapable,
    NetworkPolicyCapable, OrchestratorAdapter,
};
pub use error::{OrchestratorError, Result};
pub use factory::OrchestratorFactory;
pub use kubernetes::KubernetesAdapter;
pub use logs::LogStream;
pub use swarm::SwarmAdapter;

/// Name of the overlay network every Swarm service attaches to.
pub const DEFAULT_DOCKER_NETWORK: &str = "dokploy-network";
/// Namespace used when neither the request nor the server names one.
pub const DEFAULT_NAMESPACE: &str = "dokploy";
