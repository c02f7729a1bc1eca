//! Tunnel lifecycle: spawn, probe, track and tear down forwarders.
//!
//! At most one tunnel is tracked per session. Creating a tunnel closes any
//! previous one for the same session first, and a failed probe kills the
//! fresh forwarder before the error is returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::ports::{PortAllocator, PortPool};
use crate::{AppError, Result};

use super::probe::{ProbeOutcome, ReadinessProbe};
use super::process::{ProcessLauncher, SupervisedProcess, TunnelSpec};
use super::reaper;

/// A tracked forwarder.
#[derive(Clone)]
pub struct TunnelHandle {
    /// Owning session.
    pub session_id: String,
    /// Local listening port.
    pub local_port: u16,
    /// Forward target host.
    pub remote_host: String,
    /// Forward target port.
    pub remote_port: u16,
    /// Spawn time.
    pub created_at: DateTime<Utc>,
    process: Arc<Mutex<Box<dyn SupervisedProcess>>>,
}

/// Owns every forwarder process the orchestrator starts.
pub struct TunnelEstablisher {
    launcher: Arc<dyn ProcessLauncher>,
    ports: Arc<PortAllocator>,
    probe: ReadinessProbe,
    grace: Duration,
    forwarder_program: String,
    tunnels: Mutex<HashMap<String, TunnelHandle>>,
}

impl TunnelEstablisher {
    /// Create an establisher.
    ///
    /// `forwarder_program` is the client binary name used to find stray
    /// forwarders by port.
    #[must_use]
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        ports: Arc<PortAllocator>,
        probe: ReadinessProbe,
        grace: Duration,
        forwarder_program: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            ports,
            probe,
            grace,
            forwarder_program: forwarder_program.into(),
            tunnels: Mutex::new(HashMap::new()),
        }
    }

    /// Start a forwarder to `remote_host:remote_port` and wait until it
    /// accepts connections.
    ///
    /// Returns `Ok(None)` when `cancel` fired; the forwarder is closed.
    ///
    /// # Errors
    ///
    /// - `AppError::ResourceExhausted` if the tunnel pool is full.
    /// - `AppError::TunnelCreateFailed` if the forwarder cannot start or
    ///   exits before it is ready.
    /// - `AppError::TunnelNotReady` if the probe budget is exhausted.
    pub async fn create(
        &self,
        session_id: &str,
        remote_host: &str,
        remote_port: u16,
        cancel: &CancellationToken,
    ) -> Result<Option<u16>> {
        let span = info_span!("tunnel_create", session_id, remote_host, remote_port);
        async {
            self.close(session_id, None).await;

            let local_port = self.ports.allocate(PortPool::Tunnel).await?;
            let spec = TunnelSpec {
                session_id: session_id.to_owned(),
                local_port,
                remote_host: remote_host.to_owned(),
                remote_port,
            };
            let process = match self.launcher.launch(&spec) {
                Ok(process) => process,
                Err(err) => {
                    self.ports.release(PortPool::Tunnel, local_port).await;
                    return Err(err);
                }
            };

            let handle = TunnelHandle {
                session_id: session_id.to_owned(),
                local_port,
                remote_host: remote_host.to_owned(),
                remote_port,
                created_at: Utc::now(),
                process: Arc::new(Mutex::new(process)),
            };
            self.tunnels
                .lock()
                .await
                .insert(session_id.to_owned(), handle.clone());

            match self
                .probe
                .wait_ready(local_port, &handle.process, cancel)
                .await
            {
                ProbeOutcome::Ready => {
                    info!(local_port, "tunnel ready");
                    Ok(Some(local_port))
                }
                ProbeOutcome::Cancelled => {
                    self.close(session_id, None).await;
                    Ok(None)
                }
                ProbeOutcome::ProcessExited => {
                    self.close(session_id, None).await;
                    Err(AppError::TunnelCreateFailed(format!(
                        "forwarder for port {local_port} exited before becoming ready"
                    )))
                }
                ProbeOutcome::Exhausted { attempts } => {
                    self.close(session_id, None).await;
                    Err(AppError::TunnelNotReady(format!(
                        "port {local_port} not accepting connections after {attempts} attempts"
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Tear down the session's forwarder, if any.
    ///
    /// Terminates the tracked process, then signals any other forwarder
    /// still serving the port (`fallback_port` is used when no handle is
    /// tracked), and releases the port reservation. Failures are logged;
    /// closing an unknown session is a no-op.
    pub async fn close(&self, session_id: &str, fallback_port: Option<u16>) {
        let handle = self.tunnels.lock().await.remove(session_id);
        let port = handle.as_ref().map(|h| h.local_port).or(fallback_port);

        if let Some(handle) = handle {
            let mut process = handle.process.lock().await;
            if let Err(err) = process.terminate(self.grace).await {
                warn!(session_id, %err, "failed to terminate forwarder");
            } else {
                info!(session_id, local_port = handle.local_port, "tunnel closed");
            }
        }

        if let Some(port) = port {
            let strays = reaper::signal_forwarders(&self.forwarder_program, port);
            if strays > 0 {
                info!(session_id, port, strays, "signalled untracked forwarders");
            }
            self.ports.release(PortPool::Tunnel, port).await;
        }
    }

    /// Close every tracked tunnel.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.tunnels.lock().await.keys().cloned().collect();
        for id in ids {
            self.close(&id, None).await;
        }
    }

    /// Liveness of the session's forwarder; `None` when none is tracked.
    pub async fn is_alive(&self, session_id: &str) -> Option<bool> {
        let process = {
            let tunnels = self.tunnels.lock().await;
            Arc::clone(&tunnels.get(session_id)?.process)
        };
        let alive = process.lock().await.is_alive();
        Some(alive)
    }

    /// Local port of the session's forwarder.
    pub async fn local_port(&self, session_id: &str) -> Option<u16> {
        self.tunnels
            .lock()
            .await
            .get(session_id)
            .map(|h| h.local_port)
    }

    /// Number of tracked forwarders.
    pub async fn count(&self) -> usize {
        self.tunnels.lock().await.len()
    }
}
