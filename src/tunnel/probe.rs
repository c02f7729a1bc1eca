//! Bounded TCP readiness probe for freshly spawned forwarders.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TunnelConfig;

use super::process::SupervisedProcess;

/// How a readiness probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A connect succeeded and the settle delay elapsed.
    Ready,
    /// Every attempt failed.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The forwarder exited while being probed.
    ProcessExited,
    /// The cancellation token fired.
    Cancelled,
}

/// Connect-retry probe against a local forwarded port.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    host: String,
    interval: Duration,
    attempts: u32,
    settle: Duration,
}

impl ReadinessProbe {
    /// Create a probe with explicit parameters.
    #[must_use]
    pub fn new(host: impl Into<String>, interval: Duration, attempts: u32, settle: Duration) -> Self {
        Self {
            host: host.into(),
            interval,
            attempts,
            settle,
        }
    }

    /// Create a probe from tunnel settings.
    #[must_use]
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(
            config.probe_host.clone(),
            config.probe_interval(),
            config.probe_attempts,
            config.settle_delay(),
        )
    }

    async fn connects(&self, port: u16) -> bool {
        let attempt = TcpStream::connect((self.host.as_str(), port));
        matches!(
            tokio::time::timeout(self.interval, attempt).await,
            Ok(Ok(_))
        )
    }

    /// Retry connecting to `port` until it accepts, the budget runs out,
    /// the process dies, or `cancel` fires.
    pub async fn wait_ready(
        &self,
        port: u16,
        process: &Mutex<Box<dyn SupervisedProcess>>,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::select! {
                    () = cancel.cancelled() => return ProbeOutcome::Cancelled,
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
            if cancel.is_cancelled() {
                return ProbeOutcome::Cancelled;
            }
            if !process.lock().await.is_alive() {
                return ProbeOutcome::ProcessExited;
            }
            if self.connects(port).await {
                debug!(port, attempt, "forwarded port accepting connections");
                tokio::select! {
                    () = cancel.cancelled() => return ProbeOutcome::Cancelled,
                    () = tokio::time::sleep(self.settle) => {}
                }
                return ProbeOutcome::Ready;
            }
            debug!(port, attempt, "forwarded port not ready yet");
        }
        ProbeOutcome::Exhausted {
            attempts: self.attempts,
        }
    }
}
