//! Port allocation from the service and tunnel pools.
//!
//! A port is free when no live session in the store holds it and no
//! in-process reservation covers it. The scan, pick and reserve steps run
//! under one async lock, so concurrent callers sharing this allocator
//! never receive the same port. Allocators in other processes sharing the
//! same store can still race between the scan and the caller's write.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{PortRange, PortsConfig};
use crate::models::session::Session;
use crate::persistence::session_store::SessionStore;
use crate::{AppError, Result};

/// Identifies one of the two disjoint port pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortPool {
    /// Ports advertised to the job.
    Service,
    /// Local forwarding ports.
    Tunnel,
}

impl PortPool {
    /// The session field this pool's ports are recorded in.
    #[must_use]
    pub fn port_of(self, session: &Session) -> Option<u16> {
        match self {
            Self::Service => Some(session.service_port),
            Self::Tunnel => session.tunnel_port,
        }
    }
}

impl Display for PortPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service => f.write_str("service"),
            Self::Tunnel => f.write_str("tunnel"),
        }
    }
}

/// Hands out the lowest free port of a pool.
pub struct PortAllocator {
    store: SessionStore,
    ranges: PortsConfig,
    reserved: Mutex<HashSet<(PortPool, u16)>>,
}

impl PortAllocator {
    /// Create an allocator over the configured pools.
    #[must_use]
    pub fn new(store: SessionStore, ranges: PortsConfig) -> Self {
        Self {
            store,
            ranges,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    fn range(&self, pool: PortPool) -> PortRange {
        match pool {
            PortPool::Service => self.ranges.service,
            PortPool::Tunnel => self.ranges.tunnel,
        }
    }

    /// Reserve the lowest port in `pool` not used by any live session.
    ///
    /// The reservation lasts until [`release`](Self::release) is called.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceExhausted` when every port is taken, or
    /// `AppError::Db` if the store scan fails.
    pub async fn allocate(&self, pool: PortPool) -> Result<u16> {
        let mut reserved = self.reserved.lock().await;
        let range = self.range(pool);

        let mut used: HashSet<u16> = self
            .store
            .list()
            .await?
            .iter()
            .filter_map(|s| pool.port_of(s))
            .collect();
        used.extend(
            reserved
                .iter()
                .filter(|(p, _)| *p == pool)
                .map(|(_, port)| *port),
        );

        let port = (range.low..range.high)
            .find(|port| !used.contains(port))
            .ok_or_else(|| {
                AppError::ResourceExhausted(format!(
                    "no free {pool} port in [{}, {})",
                    range.low, range.high
                ))
            })?;

        reserved.insert((pool, port));
        debug!(%pool, port, "port reserved");
        Ok(port)
    }

    /// Drop the in-process reservation for `port`.
    ///
    /// Once the port is also gone from the store it becomes free again.
    pub async fn release(&self, pool: PortPool, port: u16) {
        if self.reserved.lock().await.remove(&(pool, port)) {
            debug!(%pool, port, "port released");
        }
    }
}
