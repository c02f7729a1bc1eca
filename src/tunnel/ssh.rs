//! SSH local port forwarding launcher.

use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::config::TunnelConfig;
use crate::{AppError, Result};

use super::process::{ChildProcess, ProcessLauncher, SupervisedProcess, TunnelSpec};

/// Launches non-interactive `ssh -N -L` forwarders.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    config: TunnelConfig,
}

impl SshLauncher {
    /// Create a launcher with the given client settings.
    #[must_use]
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    /// Client arguments for `spec`.
    ///
    /// The forward binds `bind_address:local_port` and targets
    /// `remote_host:remote_port` as seen from the login host, which is the
    /// gateway when configured and the remote host otherwise.
    #[must_use]
    pub fn forward_args(&self, spec: &TunnelSpec) -> Vec<String> {
        let config = &self.config;
        let mut args = vec![
            "-N".to_owned(),
            "-g".to_owned(),
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            "ExitOnForwardFailure=yes".to_owned(),
            "-o".to_owned(),
            format!("ServerAliveInterval={}", config.keepalive_interval_seconds),
            "-o".to_owned(),
            format!("ServerAliveCountMax={}", config.keepalive_count_max),
        ];
        args.extend(config.extra_args.iter().cloned());
        args.push("-L".to_owned());
        args.push(format!(
            "{}:{}:{}:{}",
            config.bind_address, spec.local_port, spec.remote_host, spec.remote_port
        ));

        let host = config.gateway.as_deref().unwrap_or(&spec.remote_host);
        args.push(match config.ssh_user.as_deref() {
            Some(user) => format!("{user}@{host}"),
            None => host.to_owned(),
        });
        args
    }
}

impl ProcessLauncher for SshLauncher {
    fn launch(&self, spec: &TunnelSpec) -> Result<Box<dyn SupervisedProcess>> {
        let args = self.forward_args(spec);
        let child = Command::new(&self.config.ssh_command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::TunnelCreateFailed(format!(
                    "failed to spawn {}: {err}",
                    self.config.ssh_command
                ))
            })?;

        let mut process = ChildProcess::new(child, format!("ssh-forward-{}", spec.local_port));
        if !process.is_alive() {
            return Err(AppError::TunnelCreateFailed(
                "forwarding process exited immediately".into(),
            ));
        }

        info!(
            session_id = %spec.session_id,
            pid = process.id().unwrap_or(0),
            local_port = spec.local_port,
            remote = %format!("{}:{}", spec.remote_host, spec.remote_port),
            "ssh forwarder spawned"
        );
        Ok(Box::new(process))
    }
}
