use bollard::errors::Error as DockerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to reach orchestrator ({context}): {source}")]
    Connection {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("docker request failed ({context}): {source}")]
    Docker {
        context: &'static str,
        #[source]
        source: DockerError,
    },
    #[error("kubernetes request failed ({context}): {source}")]
    Kube {
        context: &'static str,
        #[source]
        source: kube::Error,
    },
    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[source] anyhow::Error),
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),
    #[error("Server not found: {0}")]
    ServerNotFound(String),
    #[error("server store failed: {0}")]
    Store(#[source] anyhow::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl OrchestratorError {
    pub fn docker(context: &'static str, err: DockerError) -> Self {
        if is_docker_connection_error(&err) {
            OrchestratorError::Connection {
                context,
                source: err.into(),
            }
        } else {
            OrchestratorError::Docker {
                context,
                source: err,
            }
        }
    }

    pub fn kube(context: &'static str, err: kube::Error) -> Self {
        if is_kube_connection_error(&err) {
            OrchestratorError::Connection {
                context,
                source: err.into(),
            }
        } else {
            OrchestratorError::Kube {
                context,
                source: err,
            }
        }
    }

    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// True when the backend answered 404 for the object.
    pub fn is_not_found(&self) -> bool {
        match self {
            OrchestratorError::NotFound { .. } => true,
            OrchestratorError::Docker { source, .. } => is_docker_not_found(source),
            OrchestratorError::Kube { source, .. } => is_kube_not_found(source),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            OrchestratorError::Docker { source, .. } => is_docker_status(source, 409),
            OrchestratorError::Kube { source, .. } => is_kube_status(source, 409),
            _ => false,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, OrchestratorError::Connection { .. })
    }
}

pub(crate) fn is_docker_not_found(err: &DockerError) -> bool {
    is_docker_status(err, 404)
}

fn is_docker_status(err: &DockerError, status: u16) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code, .. } if *status_code == status
    )
}

fn is_docker_connection_error(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::IOError { .. }
            | DockerError::HyperResponseError { .. }
            | DockerError::RequestTimeoutError
            | DockerError::SocketNotFoundError(_)
    )
}

pub(crate) fn is_kube_not_found(err: &kube::Error) -> bool {
    is_kube_status(err, 404)
}

fn is_kube_status(err: &kube::Error, status: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == status)
}

fn is_kube_connection_error(err: &kube::Error) -> bool {
    matches!(
        err,
        kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::TlsRequired
    )
}
