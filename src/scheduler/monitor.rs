//! Bounded job polling.
//!
//! [`JobMonitor::watch`] polls the scheduler at a fixed interval and
//! streams [`JobUpdate`]s. The stream ends after the first `Running`,
//! `Terminal` or `Timeout` update; liveness after that point is the
//! tunnel's concern. Polling stops as soon as the cancellation token
//! fires or the receiver is dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::MonitorConfig;
use crate::models::job::{JobRecord, JobState, JobUpdate};

use super::client::{JobLookup, SchedulerClient};
use super::parse::first_node;
use super::resolver::NodeResolver;

const UPDATE_BUFFER: usize = 8;

/// Polls a job until it runs, ends, or the attempt budget is spent.
#[derive(Clone)]
pub struct JobMonitor {
    client: Arc<SchedulerClient>,
    resolver: Arc<dyn NodeResolver>,
    config: MonitorConfig,
}

impl JobMonitor {
    /// Create a monitor with the given polling budget.
    #[must_use]
    pub fn new(
        client: Arc<SchedulerClient>,
        resolver: Arc<dyn NodeResolver>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            client,
            resolver,
            config,
        }
    }

    /// Start polling `job_id` in a background task.
    ///
    /// The returned channel closes without a final update only when
    /// `cancel` fires.
    #[must_use]
    pub fn watch(
        &self,
        session_id: &str,
        job_id: &str,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<JobUpdate> {
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let monitor = self.clone();
        let record = JobRecord::submitted(session_id, job_id);
        let span = info_span!("job_monitor", session_id, job_id);
        tokio::spawn(async move { monitor.run(record, tx, cancel).await }.instrument(span));
        rx
    }

    async fn run(
        &self,
        mut record: JobRecord,
        tx: mpsc::Sender<JobUpdate>,
        cancel: CancellationToken,
    ) {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("job monitor cancelled");
                        return;
                    }
                    () = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }

            let lookup = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("job monitor cancelled");
                    return;
                }
                lookup = self.client.query_job(&record.job_id) => lookup,
            };

            let update = match lookup {
                Err(err) => {
                    warn!(attempt, %err, "job status query failed");
                    continue;
                }
                Ok(JobLookup::Unknown) => {
                    record.last_known_state = "UNKNOWN".to_owned();
                    info!("job vanished from scheduler");
                    JobUpdate::Terminal(record.clone())
                }
                Ok(JobLookup::Found(snapshot)) => {
                    record.last_known_state.clone_from(&snapshot.state_token);
                    match snapshot.state {
                        JobState::Pending => JobUpdate::Pending(record.clone()),
                        JobState::Terminal => {
                            info!(state = %snapshot.state_token, "job reached terminal state");
                            JobUpdate::Terminal(record.clone())
                        }
                        JobState::Running => {
                            let Some(node) = snapshot.node_list.as_deref().and_then(first_node)
                            else {
                                debug!(attempt, "job running but node list not yet published");
                                continue;
                            };
                            let address = match self.resolver.resolve(&node).await {
                                Ok(address) => address,
                                Err(err) => {
                                    warn!(node, %err, "node resolution failed, using node name");
                                    node.clone()
                                }
                            };
                            info!(node, address, "job running");
                            record.node = Some(node);
                            record.node_address = Some(address);
                            JobUpdate::Running(record.clone())
                        }
                    }
                }
            };

            let is_final = !matches!(update, JobUpdate::Pending(_));
            if tx.send(update).await.is_err() {
                debug!("job update receiver dropped");
                return;
            }
            if is_final {
                return;
            }
        }

        warn!(attempts = max_attempts, "job did not start within polling budget");
        let _ = tx
            .send(JobUpdate::Timeout {
                attempts: max_attempts,
            })
            .await;
    }
}
