//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Session store settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// `SQLite` database file backing the store.
    pub path: PathBuf,
    /// Per-service namespace under which records and the index live.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Record TTL, refreshed on every write.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Interval between expired-record sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_namespace() -> String {
    "sessions".into()
}

fn default_ttl_seconds() -> u64 {
    604_800
}

fn default_sweep_interval() -> u64 {
    300
}

/// Half-open `[low, high)` port range.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    /// First port in the range.
    pub low: u16,
    /// One past the last port in the range.
    pub high: u16,
}

impl PortRange {
    /// Number of ports in the range.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.high.saturating_sub(self.low))
    }

    /// Whether the range contains no ports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    /// Whether `port` falls within the range.
    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        port >= self.low && port < self.high
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.low < other.high && other.low < self.high
    }
}

/// The two disjoint port pools.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PortsConfig {
    /// Ports advertised to the batch job.
    pub service: PortRange,
    /// Local ports used for SSH forwarding.
    pub tunnel: PortRange,
}

/// Scheduler command-line surface.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Submission entry point.
    #[serde(default = "default_submit_command")]
    pub submit_command: String,
    /// Status and node query entry point.
    #[serde(default = "default_query_command")]
    pub query_command: String,
    /// Job cancellation entry point.
    #[serde(default = "default_cancel_command")]
    pub cancel_command: String,
    /// Upper bound on any single scheduler command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    /// Prefix for submitted job names.
    #[serde(default = "default_job_name_prefix")]
    pub job_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            submit_command: default_submit_command(),
            query_command: default_query_command(),
            cancel_command: default_cancel_command(),
            command_timeout_seconds: default_command_timeout(),
            job_name_prefix: default_job_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Command timeout as a [`Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

fn default_submit_command() -> String {
    "sbatch".into()
}

fn default_query_command() -> String {
    "scontrol".into()
}

fn default_cancel_command() -> String {
    "scancel".into()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_job_name_prefix() -> String {
    "session".into()
}

/// Job polling budget.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Delay between status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of polls before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl MonitorConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    60
}

/// SSH forwarding and readiness probe settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TunnelConfig {
    /// SSH client binary.
    #[serde(default = "default_ssh_command")]
    pub ssh_command: String,
    /// Remote login user; the client default applies when absent.
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// Host to log into; the job's node is used when absent.
    #[serde(default)]
    pub gateway: Option<String>,
    /// Local interface the forward binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// `ServerAliveInterval` passed to the client.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
    /// `ServerAliveCountMax` passed to the client.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count_max: u32,
    /// Additional client arguments placed before the forward spec.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Host the readiness probe connects to.
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    /// Delay between probe attempts.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Maximum probe attempts.
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    /// Pause after the first successful connect.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Grace period between SIGTERM and SIGKILL.
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_seconds: u64,
    /// Interval of the post-start liveness check.
    #[serde(default = "default_health_interval")]
    pub health_interval_seconds: u64,
    /// Host advertised in the session's display endpoint.
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ssh_command: default_ssh_command(),
            ssh_user: None,
            gateway: None,
            bind_address: default_bind_address(),
            keepalive_interval_seconds: default_keepalive_interval(),
            keepalive_count_max: default_keepalive_count(),
            extra_args: Vec::new(),
            probe_host: default_probe_host(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_attempts: default_probe_attempts(),
            settle_delay_ms: default_settle_delay_ms(),
            terminate_grace_seconds: default_terminate_grace(),
            health_interval_seconds: default_health_interval(),
            public_host: default_public_host(),
        }
    }
}

impl TunnelConfig {
    /// Probe interval as a [`Duration`].
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Settle delay as a [`Duration`].
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Termination grace as a [`Duration`].
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_seconds)
    }

    /// Health-check interval as a [`Duration`].
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_seconds)
    }
}

fn default_ssh_command() -> String {
    "ssh".into()
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_keepalive_count() -> u32 {
    3
}

fn default_probe_host() -> String {
    "127.0.0.1".into()
}

fn default_probe_interval_ms() -> u64 {
    1000
}

fn default_probe_attempts() -> u32 {
    30
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_terminate_grace() -> u64 {
    5
}

fn default_health_interval() -> u64 {
    5
}

fn default_public_host() -> String {
    "localhost".into()
}

/// Batch definition for one containerized service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    /// Batch script handed to the submit command.
    pub script: String,
    /// Arguments appended after the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Default partition.
    #[serde(default)]
    pub partition: Option<String>,
    /// Default CPUs per task.
    #[serde(default)]
    pub cpus: Option<u32>,
    /// Default memory request, in scheduler syntax (`4G`).
    #[serde(default)]
    pub memory: Option<String>,
    /// Default wall-clock limit, in scheduler syntax (`02:00:00`).
    #[serde(default)]
    pub time_limit: Option<String>,
}

/// How node names are turned into reachable addresses.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeResolverKind {
    /// Look names up in the `[nodes]` table.
    #[default]
    Static,
    /// Ask the scheduler for the node's `NodeAddr`.
    Scheduler,
}

fn default_true() -> bool {
    true
}

fn default_ipc_name() -> String {
    "session-orchestrator".into()
}

fn default_worker_shutdown() -> u64 {
    10
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Named pipe / Unix socket identifier of the control socket.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Shared secret required on control-socket requests when set.
    #[serde(default)]
    pub ipc_auth_token: Option<String>,
    /// Run the scheduler liveness check on every session read.
    #[serde(default = "default_true")]
    pub reconcile_on_get: bool,
    /// How long delete/restart wait for a worker to wind down.
    #[serde(default = "default_worker_shutdown")]
    pub worker_shutdown_seconds: u64,
    /// Node address resolution strategy.
    #[serde(default)]
    pub node_resolver: NodeResolverKind,
    /// Node name to address table used by the static resolver.
    #[serde(default)]
    pub nodes: HashMap<String, String>,
    /// Session store settings.
    pub store: StoreConfig,
    /// Port pools.
    pub ports: PortsConfig,
    /// Scheduler commands.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Job polling budget.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Tunnel settings.
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Known services keyed by app id.
    #[serde(default)]
    pub apps: HashMap<String, AppConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Record TTL as a [`Duration`].
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.store.ttl_seconds)
    }

    /// Worker wind-down bound as a [`Duration`].
    #[must_use]
    pub fn worker_shutdown(&self) -> Duration {
        Duration::from_secs(self.worker_shutdown_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.ports.service.is_empty() {
            return Err(AppError::Config("ports.service range is empty".into()));
        }
        if self.ports.tunnel.is_empty() {
            return Err(AppError::Config("ports.tunnel range is empty".into()));
        }
        if self.ports.service.overlaps(&self.ports.tunnel) {
            return Err(AppError::Config(
                "ports.service and ports.tunnel must be disjoint".into(),
            ));
        }
        if self.store.ttl_seconds == 0 {
            return Err(AppError::Config(
                "store.ttl_seconds must be greater than zero".into(),
            ));
        }
        if self.monitor.max_attempts == 0 {
            return Err(AppError::Config(
                "monitor.max_attempts must be greater than zero".into(),
            ));
        }
        if self.tunnel.probe_attempts == 0 {
            return Err(AppError::Config(
                "tunnel.probe_attempts must be greater than zero".into(),
            ));
        }
        if self.tunnel.health_interval_seconds == 0 {
            return Err(AppError::Config(
                "tunnel.health_interval_seconds must be greater than zero".into(),
            ));
        }
        if let Some((id, _)) = self.apps.iter().find(|(_, app)| app.script.is_empty()) {
            return Err(AppError::Config(format!("apps.{id}.script must be set")));
        }
        Ok(())
    }
}
