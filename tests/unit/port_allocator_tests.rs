//! Service and tunnel port allocation against the store and the OS.

use std::sync::Arc;
use std::time::Duration;

use session_orchestrator::config::{PortRange, PortsConfig};
use session_orchestrator::models::session::{Session, SessionConfig};
use session_orchestrator::persistence::db;
use session_orchestrator::persistence::session_store::SessionStore;
use session_orchestrator::ports::{PortAllocator, PortPool};
use session_orchestrator::AppError;

const TTL: Duration = Duration::from_secs(3600);

fn ranges() -> PortsConfig {
    PortsConfig {
        service: PortRange { low: 5900, high: 5903 },
        tunnel: PortRange { low: 8000, high: 8002 },
    }
}

async fn setup() -> (PortAllocator, SessionStore) {
    let pool = db::connect_memory().await.expect("memory db");
    let store = SessionStore::new(Arc::new(pool), "sessions");
    (PortAllocator::new(store.clone(), ranges()), store)
}

#[tokio::test]
async fn lowest_free_port_is_chosen() {
    let (ports, _store) = setup().await;
    assert_eq!(ports.allocate(PortPool::Service).await.expect("port"), 5900);
    assert_eq!(ports.allocate(PortPool::Service).await.expect("port"), 5901);
    assert_eq!(ports.allocate(PortPool::Tunnel).await.expect("port"), 8000);
}

#[tokio::test]
async fn ports_held_by_stored_sessions_are_skipped() {
    let (ports, store) = setup().await;
    let mut session = Session::new("alice".into(), "desktop".into(), SessionConfig::default(), 5900);
    session.tunnel_port = Some(8000);
    store.put(&session, TTL).await.expect("put");

    assert_eq!(ports.allocate(PortPool::Service).await.expect("port"), 5901);
    assert_eq!(ports.allocate(PortPool::Tunnel).await.expect("port"), 8001);
}

#[tokio::test]
async fn exhausted_pool_reports_resource_exhausted() {
    let (ports, _store) = setup().await;
    ports.allocate(PortPool::Tunnel).await.expect("first");
    ports.allocate(PortPool::Tunnel).await.expect("second");

    let err = ports.allocate(PortPool::Tunnel).await.expect_err("full");
    assert_eq!(
        err,
        AppError::ResourceExhausted("no free tunnel port in [8000, 8002)".into())
    );
}

#[tokio::test]
async fn released_port_is_reused() {
    let (ports, _store) = setup().await;
    let first = ports.allocate(PortPool::Tunnel).await.expect("first");
    ports.allocate(PortPool::Tunnel).await.expect("second");

    ports.release(PortPool::Tunnel, first).await;
    assert_eq!(ports.allocate(PortPool::Tunnel).await.expect("reused"), first);
}

#[tokio::test]
async fn releasing_one_pool_leaves_the_other_reserved() {
    let (ports, _store) = setup().await;
    let service = ports.allocate(PortPool::Service).await.expect("service");
    ports.release(PortPool::Tunnel, service).await;
    assert_eq!(ports.allocate(PortPool::Service).await.expect("next"), 5901);
}

#[tokio::test]
async fn concurrent_allocations_are_distinct() {
    let (ports, _store) = setup().await;
    let ports = Arc::new(ports);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let ports = Arc::clone(&ports);
            tokio::spawn(async move { ports.allocate(PortPool::Service).await })
        })
        .collect();

    let mut granted = Vec::new();
    for handle in handles {
        granted.push(handle.await.expect("join").expect("port"));
    }
    granted.sort_unstable();
    assert_eq!(granted, vec![5900, 5901, 5902]);
}
