//! Supervised child processes.
//!
//! [`SupervisedProcess`] hides the OS process behind start/liveness/
//! terminate so the SIGTERM, wait, SIGKILL escalation lives in one place
//! and the tunnel logic can be exercised with fake processes.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// A long-running child the orchestrator owns.
pub trait SupervisedProcess: Send {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Whether the process is still running.
    fn is_alive(&mut self) -> bool;

    /// Ask the process to stop, force-killing it after `grace`.
    ///
    /// Idempotent: terminating an exited process succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the process cannot be signalled or reaped.
    fn terminate(&mut self, grace: Duration) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// [`SupervisedProcess`] over a `tokio` child spawned with `kill_on_drop`.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    label: String,
}

impl ChildProcess {
    /// Wrap a spawned child; `label` only appears in logs.
    #[must_use]
    pub fn new(child: Child, label: impl Into<String>) -> Self {
        Self {
            child,
            label: label.into(),
        }
    }

    #[cfg(unix)]
    fn send_sigterm(&mut self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| AppError::Io(format!("pid {pid} out of range")))?;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(err) => Err(AppError::Io(format!("failed to signal {pid}: {err}"))),
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&mut self) -> Result<()> {
        self.child
            .start_kill()
            .map_err(|err| AppError::Io(format!("failed to stop process: {err}")))
    }
}

impl SupervisedProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(err) => {
                warn!(label = %self.label, %err, "failed to poll process status");
                false
            }
        }
    }

    fn terminate(&mut self, grace: Duration) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.is_alive() {
                debug!(label = %self.label, "process already exited");
                return Ok(());
            }

            self.send_sigterm()?;
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(label = %self.label, ?status, "process exited after SIGTERM");
                    Ok(())
                }
                Ok(Err(err)) => Err(AppError::Io(format!("failed to reap process: {err}"))),
                Err(_) => {
                    warn!(label = %self.label, ?grace, "process ignored SIGTERM, killing");
                    self.child
                        .kill()
                        .await
                        .map_err(|err| AppError::Io(format!("failed to kill process: {err}")))
                }
            }
        })
    }
}

/// What a launcher needs to start one forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Owning session.
    pub session_id: String,
    /// Local port to listen on.
    pub local_port: u16,
    /// Host the forward targets.
    pub remote_host: String,
    /// Port the forward targets.
    pub remote_port: u16,
}

/// Starts forwarding processes.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn a forwarder for `spec`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TunnelCreateFailed` if the process cannot start.
    fn launch(&self, spec: &TunnelSpec) -> Result<Box<dyn SupervisedProcess>>;
}
