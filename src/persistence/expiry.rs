//! Background sweeper for expired session records.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::session_store::SessionStore;

/// Spawn the expiry sweep background task.
///
/// The first sweep runs immediately, then once per `interval` until the
/// token fires.
#[must_use]
pub fn spawn_expiry_task(
    store: SessionStore,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("expiry sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => debug!("no expired session records"),
                        Ok(removed) => info!(removed, "purged expired session records"),
                        Err(err) => error!(%err, "expiry sweep failed"),
                    }
                }
            }
        }
    })
}
