//! Status, node and cancel queries against the scheduler CLI.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::{AppError, Result};

use super::parse::{self, JobSnapshot};
use super::runner::CommandRunner;

/// Outcome of a one-shot job lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLookup {
    /// The scheduler still knows the job.
    Found(JobSnapshot),
    /// The scheduler no longer knows the job id.
    Unknown,
}

/// Thin client over the scheduler's query and cancel commands.
pub struct SchedulerClient {
    runner: Arc<dyn CommandRunner>,
    config: SchedulerConfig,
}

impl SchedulerClient {
    /// Create a client issuing commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, config: SchedulerConfig) -> Self {
        Self { runner, config }
    }

    /// Query a job's current state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scheduler` if the command fails or its output
    /// carries no job state.
    pub async fn query_job(&self, job_id: &str) -> Result<JobLookup> {
        let args = vec!["show".to_owned(), "job".to_owned(), job_id.to_owned()];
        let output = self
            .runner
            .run(&self.config.query_command, &args, self.config.command_timeout())
            .await
            .map_err(|err| AppError::Scheduler(format!("job query failed: {err}")))?;

        if parse::is_unknown_job(&output.stdout) || parse::is_unknown_job(&output.stderr) {
            debug!(job_id, "scheduler no longer knows job");
            return Ok(JobLookup::Unknown);
        }
        if !output.success() {
            return Err(AppError::Scheduler(format!(
                "job query for {job_id} failed ({})",
                output.describe_failure()
            )));
        }

        parse::parse_job_status(&output.stdout)
            .map(JobLookup::Found)
            .ok_or_else(|| AppError::Scheduler(format!("no JobState for job {job_id}")))
    }

    /// Look up a node's `NodeAddr`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scheduler` if the command fails.
    pub async fn query_node_address(&self, node: &str) -> Result<Option<String>> {
        let args = vec!["show".to_owned(), "node".to_owned(), node.to_owned()];
        let output = self
            .runner
            .run(&self.config.query_command, &args, self.config.command_timeout())
            .await
            .map_err(|err| AppError::Scheduler(format!("node query failed: {err}")))?;

        if !output.success() {
            return Err(AppError::Scheduler(format!(
                "node query for {node} failed ({})",
                output.describe_failure()
            )));
        }
        Ok(parse::parse_key_values(&output.stdout).remove("NodeAddr"))
    }

    /// Ask the scheduler to cancel a job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scheduler` if the command cannot run or exits
    /// non-zero.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let args = vec![job_id.to_owned()];
        let output = self
            .runner
            .run(&self.config.cancel_command, &args, self.config.command_timeout())
            .await
            .map_err(|err| AppError::Scheduler(format!("cancel failed: {err}")))?;

        if !output.success() {
            return Err(AppError::Scheduler(format!(
                "cancel of {job_id} failed ({})",
                output.describe_failure()
            )));
        }
        info!(job_id, "job cancel requested");
        Ok(())
    }
}
