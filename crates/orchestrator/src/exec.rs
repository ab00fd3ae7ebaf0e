use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use common::api::ServerConfig;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

pub type DynCommandExecutor = Arc<dyn CommandExecutor>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell snippets on the host that owns a Swarm manager.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, script: &str) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SshHostKeyChecking {
    /// Accept unknown host keys and remember them.
    #[default]
    AcceptNew,
    /// Require the host key to be known already.
    Strict,
    /// Skip host key verification entirely.
    Off,
}

impl SshHostKeyChecking {
    fn strict_host_key_checking_value(self) -> &'static str {
        match self {
            Self::AcceptNew => "accept-new",
            Self::Strict => "yes",
            Self::Off => "no",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout_secs: u64,
    pub host_key_checking: SshHostKeyChecking,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            host_key_checking: SshHostKeyChecking::AcceptNew,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub options: SshOptions,
}

impl SshTarget {
    pub fn for_server(server: &ServerConfig, options: SshOptions) -> Self {
        Self {
            host: server.ip_address.clone(),
            user: server.username.clone(),
            port: server.port,
            identity_file: server.ssh_key_path.as_ref().map(PathBuf::from),
            options,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout_secs),
            "-o".to_string(),
            "ConnectionAttempts=1".to_string(),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                self.options
                    .host_key_checking
                    .strict_host_key_checking_value()
            ),
        ];
        if self.options.host_key_checking == SshHostKeyChecking::Off {
            args.push("-o".to_string());
            args.push("UserKnownHostsFile=/dev/null".to_string());
        }
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        if let Some(key) = &self.identity_file {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().into_owned());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args.push("--".to_string());
        args.push(self.destination());
        args
    }
}

/// Local `sh -c` for the platform host, `ssh` for remote servers.
#[derive(Debug, Clone)]
pub enum ShellExecutor {
    Local,
    Ssh(SshTarget),
}

impl ShellExecutor {
    pub fn for_server(server: &ServerConfig, options: SshOptions) -> Self {
        if server.is_local() {
            ShellExecutor::Local
        } else {
            ShellExecutor::Ssh(SshTarget::for_server(server, options))
        }
    }

    fn command(&self, script: &str) -> Command {
        match self {
            ShellExecutor::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
            ShellExecutor::Ssh(target) => {
                let mut cmd = Command::new("ssh");
                cmd.args(target.ssh_args());
                cmd.arg(script);
                cmd
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, script: &str) -> Result<CommandOutput> {
        let mut cmd = self.command(script);
        cmd.stdin(Stdio::null());
        debug!(script, "running shell command");
        let output = cmd
            .output()
            .await
            .map_err(|err| OrchestratorError::Connection {
                context: "exec",
                source: err.into(),
            })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Single-quotes a value for interpolation into a shell snippet.
pub fn sh_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_server() -> ServerConfig {
        ServerConfig {
            server_id: "srv-1".into(),
            name: "edge".into(),
            ip_address: "10.0.0.5".into(),
            port: 2222,
            username: "deploy".into(),
            ssh_key_path: Some("/keys/edge".into()),
            ..Default::default()
        }
    }

    #[test]
    fn sh_quote_handles_empty_and_quotes() {
        assert_eq!(sh_quote(""), "''");
        assert_eq!(sh_quote("web"), "'web'");
        assert_eq!(sh_quote("we're"), "'we'\"'\"'re'");
    }

    #[test]
    fn local_server_runs_locally() {
        let executor = ShellExecutor::for_server(&ServerConfig::local(), SshOptions::default());
        assert!(matches!(executor, ShellExecutor::Local));
    }

    #[test]
    fn ssh_args_carry_port_key_and_destination() {
        let target = SshTarget::for_server(&remote_server(), SshOptions::default());
        let args = target.ssh_args();
        assert_eq!(&args[..2], ["-p", "2222"]);
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&"/keys/edge".to_string()));
        assert!(args.contains(&"IdentitiesOnly=yes".to_string()));
        assert!(!args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("deploy@10.0.0.5"));
    }

    #[test]
    fn host_key_checking_off_drops_known_hosts() {
        let options = SshOptions {
            connect_timeout_secs: 3,
            host_key_checking: SshHostKeyChecking::Off,
        };
        let args = SshTarget::for_server(&remote_server(), options).ssh_args();
        assert!(args.contains(&"ConnectTimeout=3".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
    }

    #[tokio::test]
    async fn local_executor_captures_output_and_status() {
        let output = ShellExecutor::Local
            .run("printf 'hello'; printf 'oops' >&2; exit 7")
            .await
            .expect("run");
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr, "oops");
        assert_eq!(output.exit_code, Some(7));
        assert!(!output.success());
    }
}
