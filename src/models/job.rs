//! Scheduler job state as seen by the orchestrator.

use serde::{Deserialize, Serialize};

/// Coarse job state the orchestrator acts on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued or otherwise not yet placed.
    Pending,
    /// Running on a node.
    Running,
    /// Finished, failed or cancelled; no further progress.
    Terminal,
}

impl JobState {
    /// Map a scheduler `JobState` token.
    ///
    /// Unrecognised tokens are treated as pending so polling continues.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "RUNNING" | "COMPLETING" => Self::Running,
            "COMPLETED" | "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "PREEMPTED"
            | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" | "SPECIAL_EXIT" | "REVOKED" => {
                Self::Terminal
            }
            _ => Self::Pending,
        }
    }
}

/// Orchestrator-local view of a job, refreshed on every poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobRecord {
    /// Owning session.
    pub session_id: String,
    /// Scheduler job identifier.
    pub job_id: String,
    /// Raw scheduler state token from the last poll.
    pub last_known_state: String,
    /// Node name once running.
    pub node: Option<String>,
    /// Node address once running.
    pub node_address: Option<String>,
}

impl JobRecord {
    /// Fresh record for a just-submitted job.
    #[must_use]
    pub fn submitted(session_id: &str, job_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            job_id: job_id.to_owned(),
            last_known_state: "SUBMITTED".to_owned(),
            node: None,
            node_address: None,
        }
    }
}

/// Update emitted by the job monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// Still waiting for placement.
    Pending(JobRecord),
    /// Placed and running; node fields are populated. Final update.
    Running(JobRecord),
    /// Reached a terminal state, or vanished from the scheduler. Final update.
    Terminal(JobRecord),
    /// Polling budget exhausted. Final update.
    Timeout {
        /// Polls performed before giving up.
        attempts: u32,
    },
}
