//! Session model and lifecycle helpers.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an interactive session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Record persisted, job submission in flight.
    Creating,
    /// Job accepted by the scheduler, waiting for a node.
    Pending,
    /// Job running; the tunnel is up once `tunnel_port` is set.
    Running,
    /// Worker failed; see `error`.
    Error,
    /// Job reached a terminal scheduler state.
    Stopped,
    /// Job vanished from the scheduler or was cancelled out-of-band.
    Cancelled,
}

impl SessionStatus {
    /// Whether a worker may still be driving the session forward.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Creating | Self::Pending | Self::Running)
    }

    /// Whether a restart may be requested from this status.
    #[must_use]
    pub fn is_restartable(self) -> bool {
        matches!(
            self,
            Self::Running | Self::Error | Self::Stopped | Self::Cancelled
        )
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Creating => "CREATING",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Per-session submission overrides supplied by the caller.
///
/// Every field falls back to the app's configured default when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", default)]
pub struct SessionConfig {
    /// Scheduler partition.
    pub partition: Option<String>,
    /// CPUs per task.
    pub cpus: Option<u32>,
    /// Memory request.
    pub memory: Option<String>,
    /// Wall-clock limit.
    pub time_limit: Option<String>,
    /// Extra variables exported to the job.
    pub env: BTreeMap<String, String>,
}

/// Session record persisted in the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique identifier; immutable after creation.
    pub id: String,
    /// User who created the session.
    pub owner: String,
    /// Service the job runs.
    pub app_id: String,
    /// Submission overrides.
    #[serde(default)]
    pub config: SessionConfig,
    /// Port the job's service listens on; fixed for the session's lifetime.
    pub service_port: u16,
    /// Local forwarding port, set once the tunnel is ready.
    pub tunnel_port: Option<u16>,
    /// Scheduler job identifier of the current incarnation.
    pub job_id: Option<String>,
    /// Node the job landed on.
    pub node: Option<String>,
    /// Reachable address of `node`.
    pub node_address: Option<String>,
    /// Client-facing `host:port` once the tunnel is ready.
    pub endpoint: Option<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Last failure reason, only set in `Error`.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last transition timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new `Creating` session with a generated identifier.
    #[must_use]
    pub fn new(owner: String, app_id: String, config: SessionConfig, service_port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            app_id,
            config,
            service_port,
            tunnel_port: None,
            job_id: None,
            node: None,
            node_address: None,
            endpoint: None,
            status: SessionStatus::Creating,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// A `Running` session may be rewritten as `Running` so the tunnel port
    /// can be recorded once the forward is ready.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::{Cancelled, Creating, Error, Pending, Running, Stopped};
        matches!(
            (self.status, next),
            (Creating, Pending | Error | Cancelled)
                | (Pending, Running | Stopped | Error | Cancelled)
                | (Running, Running | Stopped | Error | Cancelled)
                | (Running | Error | Stopped | Cancelled, Creating)
        )
    }

    /// Reset job, node and tunnel fields for a fresh incarnation.
    pub fn reset_for_restart(&mut self) {
        self.status = SessionStatus::Creating;
        self.job_id = None;
        self.node = None;
        self.node_address = None;
        self.tunnel_port = None;
        self.endpoint = None;
        self.error = None;
        self.updated_at = Utc::now();
    }
}
