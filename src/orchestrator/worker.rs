//! Per-session worker task.
//!
//! A worker drives one session incarnation forward: submit the job, wait
//! for it to run, open the tunnel, then watch the tunnel until it dies or
//! the worker is cancelled. The worker is the only writer of its
//! session's job, node and tunnel fields. Every failure ends the
//! incarnation in `ERROR` and cancels the job it submitted; nothing is
//! retried here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::job::{JobRecord, JobState, JobUpdate};
use crate::models::session::{Session, SessionStatus};
use crate::persistence::session_store::SessionStore;
use crate::ports::PortAllocator;
use crate::scheduler::client::{JobLookup, SchedulerClient};
use crate::scheduler::monitor::JobMonitor;
use crate::scheduler::submitter::JobSubmitter;
use crate::tunnel::establisher::TunnelEstablisher;
use crate::{AppError, Result};

use super::registry::JobSlot;

/// Where a worker picks up the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStart {
    /// Fresh incarnation: submit a new job.
    Submit,
    /// Job already submitted: resume monitoring it.
    Monitor {
        /// Scheduler job identifier.
        job_id: String,
    },
}

/// Components and settings shared by the orchestrator and its workers.
pub(crate) struct WorkerContext {
    pub(crate) store: SessionStore,
    pub(crate) ports: Arc<PortAllocator>,
    pub(crate) submitter: Arc<JobSubmitter>,
    pub(crate) client: Arc<SchedulerClient>,
    pub(crate) monitor: JobMonitor,
    pub(crate) tunnels: Arc<TunnelEstablisher>,
    pub(crate) ttl: Duration,
    pub(crate) public_host: String,
    pub(crate) health_interval: Duration,
    update_lock: Mutex<()>,
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: SessionStore,
        ports: Arc<PortAllocator>,
        submitter: Arc<JobSubmitter>,
        client: Arc<SchedulerClient>,
        monitor: JobMonitor,
        tunnels: Arc<TunnelEstablisher>,
        ttl: Duration,
        public_host: String,
        health_interval: Duration,
    ) -> Self {
        Self {
            store,
            ports,
            submitter,
            client,
            monitor,
            tunnels,
            ttl,
            public_host,
            health_interval,
            update_lock: Mutex::new(()),
        }
    }

    /// Read-modify-write a session under the update lock.
    ///
    /// Returns `Ok(None)` when the record is gone, or when `guard` is
    /// cancelled (a stopped worker must not write).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if `next` is not reachable from the
    /// stored status, or `AppError::Db` if the store fails.
    pub(crate) async fn transition<F>(
        &self,
        session_id: &str,
        guard: Option<&CancellationToken>,
        next: SessionStatus,
        apply: F,
    ) -> Result<Option<Session>>
    where
        F: FnOnce(&mut Session),
    {
        let _lock = self.update_lock.lock().await;
        if guard.is_some_and(CancellationToken::is_cancelled) {
            return Ok(None);
        }
        let Some(mut session) = self.store.get(session_id).await? else {
            return Ok(None);
        };
        if !session.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "session {session_id} cannot move from {} to {next}",
                session.status
            )));
        }
        apply(&mut session);
        session.status = next;
        session.updated_at = Utc::now();
        self.store.put(&session, self.ttl).await?;
        debug!(session_id, status = %next, "session updated");
        Ok(Some(session))
    }

    /// Client-facing endpoint for a tunnel port.
    pub(crate) fn endpoint(&self, port: u16) -> String {
        format!("{}:{port}", self.public_host)
    }

    /// Best-effort job cancellation; failures are logged.
    pub(crate) async fn cancel_job(&self, session_id: &str, job_id: &str) {
        if let Err(err) = self.client.cancel(job_id).await {
            warn!(session_id, job_id, %err, "job cancel failed");
        }
    }
}

/// Outcome of the monitoring stage.
enum Placement {
    Running(JobRecord),
    Finished,
}

/// Drive `session_id` from `start` until the incarnation ends or
/// `cancel` fires.
pub(crate) async fn run(
    ctx: Arc<WorkerContext>,
    session_id: String,
    start: WorkerStart,
    cancel: CancellationToken,
    job: JobSlot,
) {
    let worker = Worker {
        ctx,
        session_id,
        cancel,
        job,
    };
    if let Err(err) = worker.drive(start).await {
        worker.fail(&err).await;
    }
}

struct Worker {
    ctx: Arc<WorkerContext>,
    session_id: String,
    cancel: CancellationToken,
    job: JobSlot,
}

impl Worker {
    async fn drive(&self, start: WorkerStart) -> Result<()> {
        let Some(session) = self.ctx.store.get(&self.session_id).await? else {
            debug!("session gone before worker started");
            return Ok(());
        };

        let job_id = match start {
            WorkerStart::Submit => match self.submit(&session).await? {
                Some(job_id) => job_id,
                None => return Ok(()),
            },
            WorkerStart::Monitor { job_id } => {
                *self.job.lock().await = Some(JobRecord::submitted(&self.session_id, &job_id));
                job_id
            }
        };

        let record = match self.await_running(&job_id).await? {
            Placement::Running(record) => record,
            Placement::Finished => return Ok(()),
        };

        let Some(tunnel_port) = self.open_tunnel(&record, session.service_port).await? else {
            return Ok(());
        };

        self.watch_tunnel(&job_id, tunnel_port).await
    }

    /// Submit the job and move the session to `PENDING`.
    ///
    /// Submission itself is not interrupted by cancellation; a job that
    /// lands after the worker was cancelled is cancelled again.
    async fn submit(&self, session: &Session) -> Result<Option<String>> {
        let job_id = self.ctx.submitter.submit(session).await?;

        let stored = self
            .ctx
            .transition(
                &self.session_id,
                Some(&self.cancel),
                SessionStatus::Pending,
                |s| s.job_id = Some(job_id.clone()),
            )
            .await;
        match stored {
            Ok(Some(_)) => {
                info!(job_id, "job submitted");
                *self.job.lock().await = Some(JobRecord::submitted(&self.session_id, &job_id));
                Ok(Some(job_id))
            }
            Ok(None) => {
                info!(job_id, "session stopped during submission, cancelling job");
                self.ctx.cancel_job(&self.session_id, &job_id).await;
                Ok(None)
            }
            Err(err) => {
                self.ctx.cancel_job(&self.session_id, &job_id).await;
                Err(err)
            }
        }
    }

    /// Follow the monitor until the job runs or the incarnation ends.
    async fn await_running(&self, job_id: &str) -> Result<Placement> {
        let mut updates = self
            .ctx
            .monitor
            .watch(&self.session_id, job_id, self.cancel.clone());

        while let Some(update) = updates.recv().await {
            match update {
                JobUpdate::Pending(record) => {
                    *self.job.lock().await = Some(record);
                }
                JobUpdate::Running(record) => {
                    *self.job.lock().await = Some(record.clone());
                    let node = record.node.clone();
                    let address = record.node_address.clone();
                    let stored = self
                        .ctx
                        .transition(
                            &self.session_id,
                            Some(&self.cancel),
                            SessionStatus::Running,
                            |s| {
                                s.node = node;
                                s.node_address = address;
                                s.tunnel_port = None;
                                s.endpoint = None;
                            },
                        )
                        .await?;
                    return Ok(if stored.is_some() {
                        Placement::Running(record)
                    } else {
                        Placement::Finished
                    });
                }
                JobUpdate::Terminal(record) => {
                    info!(state = %record.last_known_state, "job ended before running");
                    *self.job.lock().await = None;
                    self.ctx
                        .transition(
                            &self.session_id,
                            Some(&self.cancel),
                            SessionStatus::Stopped,
                            |_| {},
                        )
                        .await?;
                    return Ok(Placement::Finished);
                }
                JobUpdate::Timeout { attempts } => {
                    *self.job.lock().await = None;
                    self.ctx.cancel_job(&self.session_id, job_id).await;
                    return Err(AppError::MonitorTimeout(format!(
                        "job {job_id} did not start after {attempts} status polls"
                    )));
                }
            }
        }

        if self.cancel.is_cancelled() {
            debug!("job monitor stopped");
            return Ok(Placement::Finished);
        }
        Err(AppError::Scheduler(format!(
            "monitor for job {job_id} stopped without a final state"
        )))
    }

    /// Open the tunnel to the job's node and publish the endpoint.
    async fn open_tunnel(&self, record: &JobRecord, service_port: u16) -> Result<Option<u16>> {
        let remote_host = record
            .node_address
            .as_deref()
            .or(record.node.as_deref())
            .ok_or_else(|| AppError::Scheduler("running job has no node".into()))?;

        let Some(port) = self
            .ctx
            .tunnels
            .create(&self.session_id, remote_host, service_port, &self.cancel)
            .await?
        else {
            return Ok(None);
        };

        let endpoint = self.ctx.endpoint(port);
        let stored = self
            .ctx
            .transition(
                &self.session_id,
                Some(&self.cancel),
                SessionStatus::Running,
                |s| {
                    s.tunnel_port = Some(port);
                    s.endpoint = Some(endpoint);
                },
            )
            .await;
        match stored {
            Ok(Some(_)) => {
                info!(tunnel_port = port, "session running");
                Ok(Some(port))
            }
            Ok(None) => {
                self.ctx.tunnels.close(&self.session_id, Some(port)).await;
                Ok(None)
            }
            Err(err) => {
                self.ctx.tunnels.close(&self.session_id, Some(port)).await;
                Err(err)
            }
        }
    }

    /// Poll the forwarder until it dies, then settle the session.
    async fn watch_tunnel(&self, job_id: &str, tunnel_port: u16) -> Result<()> {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.ctx.health_interval) => {}
            }
            match self.ctx.tunnels.is_alive(&self.session_id).await {
                Some(true) => {}
                Some(false) => break,
                None => {
                    debug!("tunnel no longer tracked");
                    return Ok(());
                }
            }
        }

        warn!(tunnel_port, "forwarder exited");
        let lookup = self.ctx.client.query_job(job_id).await;
        self.ctx.tunnels.close(&self.session_id, Some(tunnel_port)).await;

        let job_finished = match &lookup {
            Ok(JobLookup::Unknown) => true,
            Ok(JobLookup::Found(snapshot)) => snapshot.state == JobState::Terminal,
            Err(_) => false,
        };
        if !job_finished {
            return Err(AppError::TunnelLost(format!(
                "forwarder on port {tunnel_port} exited while job {job_id} is still active"
            )));
        }

        info!(job_id, "job finished, session stopped");
        *self.job.lock().await = None;
        self.ctx
            .transition(
                &self.session_id,
                Some(&self.cancel),
                SessionStatus::Stopped,
                |s| {
                    s.tunnel_port = None;
                    s.endpoint = None;
                },
            )
            .await?;
        Ok(())
    }

    /// End the incarnation in `ERROR`, cancelling a job still held.
    ///
    /// A cancelled worker leaves the job to whoever stopped it.
    async fn fail(&self, err: &AppError) {
        warn!(%err, "session failed");
        let held = self.job.lock().await.take();
        if let Some(record) = held {
            if !self.cancel.is_cancelled() {
                self.ctx.cancel_job(&self.session_id, &record.job_id).await;
            }
        }
        let message = err.to_string();
        let result = self
            .ctx
            .transition(
                &self.session_id,
                Some(&self.cancel),
                SessionStatus::Error,
                |s| {
                    s.error = Some(message);
                    s.tunnel_port = None;
                    s.endpoint = None;
                },
            )
            .await;
        if let Err(write_err) = result {
            warn!(%write_err, "could not record session failure");
        }
    }
}
