//! Job submission.
//!
//! Renders a submit command line from a session and its app definition,
//! runs it once, and extracts the job id. Retries are left to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use crate::config::{AppConfig, SchedulerConfig};
use crate::models::session::Session;
use crate::{AppError, Result};

use super::parse;
use super::runner::CommandRunner;

/// Submits session jobs to the batch scheduler.
pub struct JobSubmitter {
    runner: Arc<dyn CommandRunner>,
    scheduler: SchedulerConfig,
    apps: HashMap<String, AppConfig>,
}

impl JobSubmitter {
    /// Create a submitter for the configured apps.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        scheduler: SchedulerConfig,
        apps: HashMap<String, AppConfig>,
    ) -> Self {
        Self {
            runner,
            scheduler,
            apps,
        }
    }

    /// Whether `app_id` has a batch definition.
    #[must_use]
    pub fn has_app(&self, app_id: &str) -> bool {
        self.apps.contains_key(app_id)
    }

    /// Build the submit arguments for `session`.
    ///
    /// Session overrides win over app defaults. Exported values may not
    /// contain commas since the scheduler uses them as separators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown app, or
    /// `AppError::SubmissionFailed` for an unexportable variable.
    pub fn render_args(&self, session: &Session) -> Result<Vec<String>> {
        let app = self
            .apps
            .get(&session.app_id)
            .ok_or_else(|| AppError::NotFound(format!("app {}", session.app_id)))?;
        let short_id: String = session.id.chars().take(8).collect();

        let mut exports = vec![
            "ALL".to_owned(),
            format!("SESSION_ID={}", session.id),
            format!("SERVICE_PORT={}", session.service_port),
            format!("APP_ID={}", session.app_id),
        ];
        for (key, value) in &session.config.env {
            if key.is_empty() || key.contains(['=', ',']) || value.contains(',') {
                return Err(AppError::SubmissionFailed(format!(
                    "cannot export variable {key:?}"
                )));
            }
            exports.push(format!("{key}={value}"));
        }

        let mut args = vec![
            format!("--job-name={}-{short_id}", self.scheduler.job_name_prefix),
            format!("--export={}", exports.join(",")),
        ];

        let config = &session.config;
        if let Some(partition) = config.partition.as_ref().or(app.partition.as_ref()) {
            args.push(format!("--partition={partition}"));
        }
        if let Some(cpus) = config.cpus.or(app.cpus) {
            args.push(format!("--cpus-per-task={cpus}"));
        }
        if let Some(memory) = config.memory.as_ref().or(app.memory.as_ref()) {
            args.push(format!("--mem={memory}"));
        }
        if let Some(limit) = config.time_limit.as_ref().or(app.time_limit.as_ref()) {
            args.push(format!("--time={limit}"));
        }

        args.push(app.script.clone());
        args.extend(app.args.iter().cloned());
        Ok(args)
    }

    /// Submit the session's job and return the scheduler job id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SubmissionFailed` when the command cannot run,
    /// exits non-zero, or prints no job id. Captured stderr is included.
    pub async fn submit(&self, session: &Session) -> Result<String> {
        let span = info_span!("submit_job", session_id = %session.id, app_id = %session.app_id);
        async {
            let args = self.render_args(session)?;
            let output = self
                .runner
                .run(
                    &self.scheduler.submit_command,
                    &args,
                    self.scheduler.command_timeout(),
                )
                .await
                .map_err(|err| AppError::SubmissionFailed(err.to_string()))?;

            if !output.success() {
                warn!(failure = %output.describe_failure(), "scheduler rejected submission");
                return Err(AppError::SubmissionFailed(output.describe_failure()));
            }

            let job_id = parse::parse_job_id(&output.stdout).ok_or_else(|| {
                let stderr = output.stderr.trim();
                AppError::SubmissionFailed(if stderr.is_empty() {
                    "no job id in submit output".to_owned()
                } else {
                    format!("no job id in submit output: {stderr}")
                })
            })?;

            info!(job_id, "job submitted");
            Ok(job_id)
        }
        .instrument(span)
        .await
    }
}
