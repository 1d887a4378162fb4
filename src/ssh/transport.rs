//! Remote command transport.
//!
//! [`Transport`] is the seam between the fleet executor and the network.
//! [`OpenSshTransport`] drives the system `ssh` client: gateway tunnels are
//! multiplexed control masters, and hosts behind a gateway reach it through
//! a `ProxyCommand` that rides the master connection.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use super::tunnel::{GatewayKey, GatewayTunnel};
use crate::config::{DEFAULT_SSH_PORT, Host};

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// ssh could not be launched.
    Spawn,
    /// Connection or command exceeded its time budget.
    Timeout,
    /// ssh or the remote command exited non-zero.
    Exit,
    /// The host's gateway tunnel is unavailable.
    Tunnel,
}

/// A failure to reach a host or run a command on it.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to execute ssh for {target}: {message}")]
    Spawn { target: String, message: String },

    #[error("{target} timed out after {secs}s")]
    Timeout { target: String, secs: u64 },

    #[error("{target} failed (exit code {code:?}): {reason}")]
    Exit {
        target: String,
        code: Option<i32>,
        reason: String,
    },

    #[error("Gateway {gateway} unavailable: {reason}")]
    Tunnel { gateway: String, reason: String },
}

impl TransportError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Spawn { .. } => FailureKind::Spawn,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Exit { .. } => FailureKind::Exit,
            Self::Tunnel { .. } => FailureKind::Tunnel,
        }
    }
}

/// Network access used by the live executor.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes a tunnel through a jump host.
    async fn open_tunnel(&self, key: &GatewayKey) -> Result<GatewayTunnel, TransportError>;

    /// Runs `command` on `host`, through `tunnel` when given, and returns
    /// its trimmed standard output.
    async fn run(
        &self,
        host: &Host,
        tunnel: Option<&GatewayTunnel>,
        command: &str,
    ) -> Result<String, TransportError>;

    /// Tears a tunnel down. Failures are only logged.
    async fn close_tunnel(&self, tunnel: &GatewayTunnel);
}

/// Transport backed by the OpenSSH client binary.
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    ssh_binary: PathBuf,
    connect_timeout: Duration,
    command_timeout: Duration,
    /// Directory holding the control sockets of this process.
    control_dir: PathBuf,
}

impl OpenSshTransport {
    #[must_use]
    pub fn new(ssh_binary: PathBuf, connect_timeout: Duration, command_timeout: Duration) -> Self {
        assert!(!ssh_binary.as_os_str().is_empty(), "ssh binary must be set");

        let control_dir =
            std::env::temp_dir().join(format!("smartos-manager-{}", std::process::id()));
        Self {
            ssh_binary,
            connect_timeout,
            command_timeout,
            control_dir,
        }
    }

    /// Returns the control socket path for a gateway.
    #[must_use]
    pub fn control_path(&self, key: &GatewayKey) -> PathBuf {
        let name: String = format!("{}-{}", key.user, key.address)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.control_dir.join(format!("{name}.sock"))
    }

    /// Options shared by every ssh invocation.
    fn common_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ]
    }

    /// Builds the arguments for running `command` on `host`.
    #[must_use]
    pub fn host_args(&self, host: &Host, tunnel: Option<&GatewayTunnel>, command: &str) -> Vec<String> {
        let mut args = self.common_args();

        if let Some(tunnel) = tunnel {
            let proxy = match tunnel.control_path() {
                Some(socket) => format!(
                    "ProxyCommand={} -S {} -W %h:%p {}",
                    self.ssh_binary.display(),
                    socket.display(),
                    tunnel.key().target()
                ),
                None => format!(
                    "ProxyCommand={} -W %h:%p {}",
                    self.ssh_binary.display(),
                    tunnel.key().target()
                ),
            };
            args.push("-o".to_string());
            args.push(proxy);
        }

        if host.port != DEFAULT_SSH_PORT {
            args.push("-p".to_string());
            args.push(host.port.to_string());
        }

        args.push(host.target());
        args.push(command.to_string());
        args
    }

    /// Builds the arguments that start a backgrounded control master.
    #[must_use]
    pub fn master_args(&self, key: &GatewayKey, socket: &Path) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-o".to_string(),
            "ControlPersist=no".to_string(),
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-S".to_string(),
            socket.display().to_string(),
            key.target(),
        ]);
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn output_within(
        mut cmd: Command,
        limit: Duration,
        target: &str,
    ) -> Result<Output, TransportError> {
        match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(TransportError::Spawn {
                target: target.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(TransportError::Timeout {
                target: target.to_string(),
                secs: limit.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn open_tunnel(&self, key: &GatewayKey) -> Result<GatewayTunnel, TransportError> {
        let tunnel_error = |reason: String| TransportError::Tunnel {
            gateway: key.to_string(),
            reason,
        };

        tokio::fs::create_dir_all(&self.control_dir)
            .await
            .map_err(|e| tunnel_error(format!("cannot create control directory: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = tokio::fs::set_permissions(&self.control_dir, perms).await;
        }

        let socket = self.control_path(key);
        let mut cmd = self.command(&self.master_args(key, &socket));
        // The forked master keeps inherited pipes open, so nothing is captured.
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        debug!("Starting control master for {} at {}", key, socket.display());
        let status = match tokio::time::timeout(self.connect_timeout * 2, cmd.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(tunnel_error(format!("cannot execute ssh: {e}"))),
            Err(_) => {
                return Err(tunnel_error(format!(
                    "timed out after {}s",
                    (self.connect_timeout * 2).as_secs()
                )));
            }
        };

        if !status.success() {
            return Err(tunnel_error(format!(
                "control master exited with {:?}",
                status.code()
            )));
        }

        Ok(GatewayTunnel::new(key.clone(), Some(socket)))
    }

    async fn run(
        &self,
        host: &Host,
        tunnel: Option<&GatewayTunnel>,
        command: &str,
    ) -> Result<String, TransportError> {
        let target = host.target();
        let cmd = self.command(&self.host_args(host, tunnel, command));

        debug!("Executing on {}: {}", target, command);
        let output =
            Self::output_within(cmd, self.connect_timeout + self.command_timeout, &target).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "ssh failed for {}: exit_code={:?}, stderr={}",
                target,
                output.status.code(),
                stderr.chars().take(200).collect::<String>()
            );
            return Err(TransportError::Exit {
                target,
                code: output.status.code(),
                reason: summarize_stderr(&stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("{} returned {} bytes", target, stdout.len());
        Ok(stdout.trim().to_string())
    }

    async fn close_tunnel(&self, tunnel: &GatewayTunnel) {
        let Some(socket) = tunnel.control_path() else {
            return;
        };

        let args = vec![
            "-S".to_string(),
            socket.display().to_string(),
            "-O".to_string(),
            "exit".to_string(),
            tunnel.key().target(),
        ];
        let mut cmd = self.command(&args);
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        match tokio::time::timeout(self.connect_timeout, cmd.status()).await {
            Ok(Ok(status)) if status.success() => debug!("Closed tunnel {}", tunnel.key()),
            Ok(Ok(status)) => debug!("Tunnel {} exit returned {:?}", tunnel.key(), status.code()),
            Ok(Err(e)) => warn!("Cannot close tunnel {}: {}", tunnel.key(), e),
            Err(_) => warn!("Timed out closing tunnel {}", tunnel.key()),
        }
    }
}

/// Reduces ssh stderr to a short reason.
fn summarize_stderr(stderr: &str) -> String {
    if stderr.contains("Permission denied") {
        "Permission denied".to_string()
    } else if stderr.contains("Connection refused") {
        "Connection refused".to_string()
    } else if stderr.contains("timed out") {
        "Connection timed out".to_string()
    } else if stderr.trim().is_empty() {
        "no output on stderr".to_string()
    } else {
        stderr.trim().chars().take(100).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn transport() -> OpenSshTransport {
        OpenSshTransport::new(
            PathBuf::from("ssh"),
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_direct_host_args() {
        let host = Host::new("node1", "10.0.0.1");
        let args = transport().host_args(&host, None, "uname -v");

        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=5",
                "-o",
                "StrictHostKeyChecking=no",
                "root@10.0.0.1",
                "uname -v",
            ]
        );
    }

    #[test]
    fn test_gateway_host_args_use_control_socket() {
        let t = transport();
        let key = GatewayKey::new("bastion", "jump");
        let tunnel = GatewayTunnel::new(key.clone(), Some(t.control_path(&key)));
        let mut host = Host::new("node1", "10.0.0.1").with_gateway("bastion", Some("jump".into()));
        host.port = 2222;

        let args = t.host_args(&host, Some(&tunnel), "uname -v");

        let proxy = args
            .iter()
            .find(|a| a.starts_with("ProxyCommand="))
            .map(String::as_str)
            .unwrap_or_default();
        assert!(proxy.contains("-W %h:%p jump@bastion"));
        assert!(proxy.contains("jump-bastion.sock"));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert_eq!(args.last().map(String::as_str), Some("uname -v"));
    }

    #[test]
    fn test_master_args() {
        let t = transport();
        let key = GatewayKey::new("bastion.example.com", "jump");
        let socket = t.control_path(&key);
        let args = t.master_args(&key, &socket);

        assert!(args.contains(&"-M".to_string()));
        assert!(args.contains(&"-f".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("jump@bastion.example.com"));
    }

    #[test]
    fn test_control_path_is_sanitized() {
        let t = transport();
        let path = t.control_path(&GatewayKey::new("fe80::1", "ops user"));
        let name = path.file_name().map(|n| n.to_string_lossy().to_string());
        assert_eq!(name.as_deref(), Some("ops_user-fe80__1.sock"));
    }

    #[test]
    fn test_summarize_stderr() {
        assert_eq!(
            summarize_stderr("root@10.0.0.1: Permission denied (publickey)."),
            "Permission denied"
        );
        assert_eq!(
            summarize_stderr("ssh: connect to host x port 22: Connection refused"),
            "Connection refused"
        );
        assert_eq!(summarize_stderr("  "), "no output on stderr");
    }

    #[test]
    fn test_error_kind() {
        let err = TransportError::Timeout {
            target: "root@h".to_string(),
            secs: 3,
        };
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(err.to_string().contains("3s"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let t = OpenSshTransport::new(
            PathBuf::from("/nonexistent/ssh-binary"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let err = t
            .run(&Host::new("n", "10.0.0.1"), None, "true")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Spawn);
    }
}
