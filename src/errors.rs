//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with the session store.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Control socket communication failure.
    Ipc(String),
    /// Requested session (or app) does not exist.
    NotFound(String),
    /// Operation is not permitted from the session's current state.
    InvalidState(String),
    /// The scheduler rejected the submission or could not be invoked.
    SubmissionFailed(String),
    /// A scheduler status, node or cancel command failed.
    Scheduler(String),
    /// The job never reached a running or terminal state within budget.
    MonitorTimeout(String),
    /// The forwarding process could not be spawned.
    TunnelCreateFailed(String),
    /// The readiness probe budget was exhausted.
    TunnelNotReady(String),
    /// An established forwarding process exited while the job kept running.
    TunnelLost(String),
    /// No free port left in a pool.
    ResourceExhausted(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::SubmissionFailed(msg) => write!(f, "submission failed: {msg}"),
            Self::Scheduler(msg) => write!(f, "scheduler: {msg}"),
            Self::MonitorTimeout(msg) => write!(f, "monitor timeout: {msg}"),
            Self::TunnelCreateFailed(msg) => write!(f, "tunnel create failed: {msg}"),
            Self::TunnelNotReady(msg) => write!(f, "tunnel not ready: {msg}"),
            Self::TunnelLost(msg) => write!(f, "tunnel lost: {msg}"),
            Self::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}
