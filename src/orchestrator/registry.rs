//! In-memory registry of per-session workers.
//!
//! Only the orchestrator holds the registry. Each entry carries the
//! worker's cancellation token, its join handle and the last job record
//! the worker observed. A worker that ends on its own removes its entry;
//! the generation number keeps it from removing a successor's.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::job::JobRecord;

/// Shared slot the worker refreshes with each job poll.
pub type JobSlot = Arc<Mutex<Option<JobRecord>>>;

/// Handle to one running session worker.
pub struct WorkerHandle {
    /// Fires to stop the worker.
    pub cancel: CancellationToken,
    /// Worker task.
    pub join: JoinHandle<()>,
    /// Last job record seen by the worker.
    pub job: JobSlot,
    /// Registry-assigned incarnation number.
    pub generation: u64,
}

impl WorkerHandle {
    /// Cancel the worker and wait up to `wait` for it to finish.
    ///
    /// A worker that does not finish in time is aborted.
    pub async fn stop(self, session_id: &str, wait: Duration) {
        self.cancel.cancel();
        let mut join = self.join;
        match tokio::time::timeout(wait, &mut join).await {
            Ok(Ok(())) => debug!(session_id, "worker stopped"),
            Ok(Err(err)) if err.is_cancelled() => debug!(session_id, "worker aborted"),
            Ok(Err(err)) => warn!(session_id, %err, "worker task failed"),
            Err(_) => {
                warn!(session_id, "worker did not stop in time, aborting");
                join.abort();
            }
        }
    }
}

/// Concurrency-safe map of session id to worker.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerHandle>>,
    generations: AtomicU64,
}

impl WorkerRegistry {
    /// Number for the next worker handle.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// Track `handle` for `session_id`, returning any handle it replaces.
    pub async fn insert(&self, session_id: &str, handle: WorkerHandle) -> Option<WorkerHandle> {
        self.workers
            .lock()
            .await
            .insert(session_id.to_owned(), handle)
    }

    /// Stop tracking the worker for `session_id`.
    pub async fn remove(&self, session_id: &str) -> Option<WorkerHandle> {
        self.workers.lock().await.remove(session_id)
    }

    /// Drop the entry of a worker that ended on its own.
    ///
    /// Does nothing if the entry now belongs to another generation.
    pub async fn remove_finished(&self, session_id: &str, generation: u64) -> bool {
        let mut workers = self.workers.lock().await;
        if workers.get(session_id).map(|w| w.generation) != Some(generation) {
            return false;
        }
        workers.remove(session_id);
        debug!(session_id, generation, "finished worker released");
        true
    }

    /// Remove and return every tracked worker.
    pub async fn drain(&self) -> Vec<(String, WorkerHandle)> {
        self.workers.lock().await.drain().collect()
    }

    /// Last job record observed by the session's running worker.
    pub async fn job_record(&self, session_id: &str) -> Option<JobRecord> {
        let slot = {
            let workers = self.workers.lock().await;
            Arc::clone(&workers.get(session_id)?.job)
        };
        let record = slot.lock().await.clone();
        record
    }

    /// Number of tracked workers.
    pub async fn active(&self) -> usize {
        self.workers.lock().await.len()
    }
}
