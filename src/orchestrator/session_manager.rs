//! Session lifecycle façade: create, read, list, delete, restart.
//!
//! [`SessionOrchestrator`] is the only entry point for session mutations.
//! Requests do the synchronous part (port allocation, record writes,
//! teardown) and hand the long-running part to a per-session worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::job::JobRecord;
use crate::models::session::{Session, SessionConfig, SessionStatus};
use crate::persistence::session_store::SessionStore;
use crate::ports::{PortAllocator, PortPool};
use crate::scheduler::client::{JobLookup, SchedulerClient};
use crate::scheduler::monitor::JobMonitor;
use crate::scheduler::resolver;
use crate::scheduler::runner::{CommandRunner, ProcessRunner};
use crate::scheduler::submitter::JobSubmitter;
use crate::tunnel::establisher::TunnelEstablisher;
use crate::tunnel::probe::ReadinessProbe;
use crate::tunnel::process::ProcessLauncher;
use crate::tunnel::ssh::SshLauncher;
use crate::{AppError, Result};

use super::registry::{JobSlot, WorkerHandle, WorkerRegistry};
use super::worker::{self, WorkerContext, WorkerStart};

/// Owns the session state machine and every session worker.
#[derive(Clone)]
pub struct SessionOrchestrator {
    ctx: Arc<WorkerContext>,
    registry: Arc<WorkerRegistry>,
    lifecycle: Arc<Mutex<()>>,
    reconcile_on_get: bool,
    worker_shutdown: Duration,
}

fn not_found(session_id: &str) -> AppError {
    AppError::NotFound(format!("session {session_id}"))
}

impl SessionOrchestrator {
    /// Build an orchestrator from configuration with injected command
    /// and process seams.
    #[must_use]
    pub fn new(
        config: &GlobalConfig,
        store: SessionStore,
        runner: Arc<dyn CommandRunner>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let ports = Arc::new(PortAllocator::new(store.clone(), config.ports));
        let client = Arc::new(SchedulerClient::new(
            Arc::clone(&runner),
            config.scheduler.clone(),
        ));
        let submitter = Arc::new(JobSubmitter::new(
            runner,
            config.scheduler.clone(),
            config.apps.clone(),
        ));
        let monitor = JobMonitor::new(
            Arc::clone(&client),
            resolver::from_config(config, Arc::clone(&client)),
            config.monitor,
        );
        let tunnels = Arc::new(TunnelEstablisher::new(
            launcher,
            Arc::clone(&ports),
            ReadinessProbe::from_config(&config.tunnel),
            config.tunnel.terminate_grace(),
            config.tunnel.ssh_command.clone(),
        ));
        let ctx = WorkerContext::new(
            store,
            ports,
            submitter,
            client,
            monitor,
            tunnels,
            config.ttl(),
            config.tunnel.public_host.clone(),
            config.tunnel.health_interval(),
        );

        Self {
            ctx: Arc::new(ctx),
            registry: Arc::new(WorkerRegistry::default()),
            lifecycle: Arc::new(Mutex::new(())),
            reconcile_on_get: config.reconcile_on_get,
            worker_shutdown: config.worker_shutdown(),
        }
    }

    /// Build an orchestrator that runs real scheduler commands and SSH
    /// forwarders.
    #[must_use]
    pub fn from_config(config: &GlobalConfig, store: SessionStore) -> Self {
        Self::new(
            config,
            store,
            Arc::new(ProcessRunner),
            Arc::new(SshLauncher::new(config.tunnel.clone())),
        )
    }

    /// Create a session and start its worker.
    ///
    /// Returns as soon as the `CREATING` record is persisted.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if `app_id` is not configured.
    /// - `AppError::ResourceExhausted` if the service pool is full; no
    ///   record is written.
    /// - `AppError::Db` if the record cannot be persisted.
    pub async fn create_session(
        &self,
        app_id: &str,
        config: SessionConfig,
        owner: &str,
    ) -> Result<Session> {
        let span = info_span!("create_session", app_id, owner);
        async {
            if !self.ctx.submitter.has_app(app_id) {
                return Err(AppError::NotFound(format!("app {app_id}")));
            }

            let port = self.ctx.ports.allocate(PortPool::Service).await?;
            let session = Session::new(owner.to_owned(), app_id.to_owned(), config, port);
            let persisted = self.ctx.store.put(&session, self.ctx.ttl).await;
            self.ctx.ports.release(PortPool::Service, port).await;
            persisted?;

            info!(session_id = %session.id, service_port = port, "session created");
            self.spawn_worker(&session.id, WorkerStart::Submit).await;
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Read a session, reconciling it against the scheduler first.
    ///
    /// A live session whose job the scheduler no longer knows is marked
    /// `CANCELLED` before it is returned. Scheduler errors during the
    /// check are logged and the stored record is returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id, or `AppError::Db`.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let session = self
            .ctx
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| not_found(session_id))?;

        if !self.reconcile_on_get || !session.status.is_live() {
            return Ok(session);
        }
        let Some(job_id) = session.job_id.as_deref() else {
            return Ok(session);
        };

        match self.ctx.client.query_job(job_id).await {
            Ok(JobLookup::Unknown) => self.reconcile_vanished(session_id, job_id).await,
            Ok(JobLookup::Found(_)) => Ok(session),
            Err(err) => {
                warn!(session_id, %err, "liveness check failed");
                Ok(session)
            }
        }
    }

    /// Cancel a session whose job `job_id` the scheduler no longer knows.
    ///
    /// The record is re-read under the lifecycle lock; if a delete or
    /// restart moved it to another job in the meantime, it is returned
    /// untouched.
    async fn reconcile_vanished(&self, session_id: &str, job_id: &str) -> Result<Session> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self
            .ctx
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| not_found(session_id))?;
        if !current.status.is_live() || current.job_id.as_deref() != Some(job_id) {
            debug!(session_id, job_id, "session moved on during liveness check");
            return Ok(current);
        }
        info!(session_id, job_id, "job vanished, cancelling session");

        self.stop_worker(session_id).await;
        self.ctx.tunnels.close(session_id, current.tunnel_port).await;

        let updated = self
            .ctx
            .transition(session_id, None, SessionStatus::Cancelled, |s| {
                s.tunnel_port = None;
                s.endpoint = None;
            })
            .await;
        match updated {
            Ok(Some(updated)) => Ok(updated),
            Ok(None) => Err(not_found(session_id)),
            // The worker settled the session first.
            Err(AppError::InvalidState(_)) => self
                .ctx
                .store
                .get(session_id)
                .await?
                .ok_or_else(|| not_found(session_id)),
            Err(err) => Err(err),
        }
    }

    /// All live session records, oldest first. No reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.ctx.store.list().await
    }

    /// Tear a session down and remove its record.
    ///
    /// The worker is stopped, the job cancelled and the tunnel closed, all
    /// best effort, before the record is deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist (also on
    /// a repeated delete), or `AppError::Db`.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let span = info_span!("delete_session", session_id);
        async {
            let _lifecycle = self.lifecycle.lock().await;
            let session = self
                .ctx
                .store
                .get(session_id)
                .await?
                .ok_or_else(|| not_found(session_id))?;

            self.teardown(&session).await;

            if !self.ctx.store.delete(session_id).await? {
                return Err(not_found(session_id));
            }
            info!("session deleted");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Reset a session in place and drive a fresh submission.
    ///
    /// The id and service port are kept; job, node and tunnel fields are
    /// cleared after the old job and tunnel are torn down.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session does not exist.
    /// - `AppError::InvalidState` while the session is `CREATING` or
    ///   `PENDING`.
    /// - `AppError::Db` if the store fails.
    pub async fn restart_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("restart_session", session_id);
        async {
            let _lifecycle = self.lifecycle.lock().await;
            let session = self
                .ctx
                .store
                .get(session_id)
                .await?
                .ok_or_else(|| not_found(session_id))?;
            if !session.status.is_restartable() {
                return Err(AppError::InvalidState(format!(
                    "cannot restart session {session_id} while {}",
                    session.status
                )));
            }

            self.teardown(&session).await;

            let restarted = self
                .ctx
                .transition(
                    session_id,
                    None,
                    SessionStatus::Creating,
                    Session::reset_for_restart,
                )
                .await?
                .ok_or_else(|| not_found(session_id))?;

            info!("session restarted");
            self.spawn_worker(session_id, WorkerStart::Submit).await;
            Ok(restarted)
        }
        .instrument(span)
        .await
    }

    /// Last job record the session's worker observed, while it runs.
    pub async fn job_record(&self, session_id: &str) -> Option<JobRecord> {
        self.registry.job_record(session_id).await
    }

    /// Number of workers not yet finished or stopped.
    pub async fn active_workers(&self) -> usize {
        self.registry.active().await
    }

    /// Number of forwarders currently tracked.
    pub async fn open_tunnels(&self) -> usize {
        self.ctx.tunnels.count().await
    }

    /// Recover sessions left live by a previous daemon run.
    ///
    /// Sessions with a submitted job get a worker that resumes monitoring;
    /// stale forwarders on their old tunnel port are reaped first.
    /// Sessions interrupted before submission are marked `ERROR`.
    ///
    /// Returns the number of resumed workers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn resume_all(&self) -> Result<usize> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut resumed = 0;
        for session in self.ctx.store.list().await? {
            if !session.status.is_live() {
                continue;
            }
            let session_id = session.id.as_str();

            let Some(job_id) = session.job_id.clone() else {
                let marked = self
                    .ctx
                    .transition(session_id, None, SessionStatus::Error, |s| {
                        s.error = Some("interrupted before submission".into());
                    })
                    .await;
                if let Err(err) = marked {
                    warn!(session_id, %err, "could not mark interrupted session");
                }
                continue;
            };

            if let Some(port) = session.tunnel_port {
                self.ctx.tunnels.close(session_id, Some(port)).await;
                let cleared = self
                    .ctx
                    .transition(session_id, None, SessionStatus::Running, |s| {
                        s.tunnel_port = None;
                        s.endpoint = None;
                    })
                    .await;
                if let Err(err) = cleared {
                    warn!(session_id, %err, "could not clear stale tunnel port");
                }
            }

            info!(session_id, job_id, status = %session.status, "resuming session");
            self.spawn_worker(session_id, WorkerStart::Monitor { job_id })
                .await;
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Stop every worker and close every tunnel.
    ///
    /// Records and scheduler jobs are left in place for [`resume_all`](Self::resume_all).
    pub async fn shutdown(&self) {
        let workers = self.registry.drain().await;
        info!(workers = workers.len(), "stopping session workers");
        for (_, handle) in &workers {
            handle.cancel.cancel();
        }
        for (session_id, handle) in workers {
            handle.stop(&session_id, self.worker_shutdown).await;
        }
        self.ctx.tunnels.close_all().await;
    }

    async fn spawn_worker(&self, session_id: &str, start: WorkerStart) {
        let cancel = CancellationToken::new();
        let job = JobSlot::default();
        let generation = self.registry.next_generation();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let registry = Arc::clone(&self.registry);
        let ctx = Arc::clone(&self.ctx);
        let id = session_id.to_owned();
        let worker_cancel = cancel.clone();
        let worker_job = Arc::clone(&job);
        let span = info_span!("session_worker", session_id);
        let join = tokio::spawn(
            async move {
                // Evicting before the entry exists would leave it behind.
                let _ = registered_rx.await;
                worker::run(ctx, id.clone(), start, worker_cancel, worker_job).await;
                registry.remove_finished(&id, generation).await;
            }
            .instrument(span),
        );

        let handle = WorkerHandle {
            cancel,
            join,
            job,
            generation,
        };
        let previous = self.registry.insert(session_id, handle).await;
        let _ = registered_tx.send(());
        if let Some(previous) = previous {
            previous.stop(session_id, self.worker_shutdown).await;
        }
    }

    async fn stop_worker(&self, session_id: &str) {
        if let Some(handle) = self.registry.remove(session_id).await {
            handle.stop(session_id, self.worker_shutdown).await;
        }
    }

    /// Stop the worker, cancel the job and close the tunnel; best effort.
    async fn teardown(&self, session: &Session) {
        self.stop_worker(&session.id).await;
        let current = match self.ctx.store.get(&session.id).await {
            Ok(Some(current)) => current,
            Ok(None) => session.clone(),
            Err(err) => {
                warn!(session_id = %session.id, %err, "re-read before teardown failed");
                session.clone()
            }
        };
        if let Some(job_id) = current.job_id.as_deref() {
            self.ctx.cancel_job(&current.id, job_id).await;
        }
        self.ctx.tunnels.close(&current.id, current.tunnel_port).await;
    }
}
