//! Delete, restart, reconciliation, tunnel health and recovery paths.

use std::sync::Arc;
use std::time::Duration;

use session_orchestrator::models::session::{Session, SessionConfig, SessionStatus};
use session_orchestrator::scheduler::runner::CommandRunner;
use session_orchestrator::AppError;

use super::test_helpers::{
    orchestrator, orchestrator_with_runner, test_config, wait_for, wait_for_idle,
    wait_for_status, wait_for_tunnel, FakeLauncher, FakeScheduler, GatedScheduler,
};

#[tokio::test]
async fn delete_twice_is_not_found_the_second_time() {
    let config = test_config(47200, 47210, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "alice")
        .await
        .expect("create");
    wait_for_tunnel(&store, &created.id).await;

    orch.delete_session(&created.id).await.expect("first delete");
    let second = orch.delete_session(&created.id).await;
    assert!(matches!(second, Err(AppError::NotFound(_))));

    assert!(matches!(
        orch.get_session(&created.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(!store.exists(&created.id).await.expect("exists"));
    assert!(store.list_ids().await.expect("ids").is_empty());
    assert_eq!(scheduler.cancelled(), vec!["42".to_owned()]);
    assert_eq!(launcher.alive(), 0);
    assert_eq!(orch.open_tunnels().await, 0);
    assert_eq!(orch.active_workers().await, 0);
}

#[tokio::test]
async fn delete_unknown_session_is_not_found() {
    let config = test_config(47210, 47220, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, _store) = orchestrator(&config, &scheduler, &launcher).await;

    let result = orch.delete_session("missing").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(scheduler.cancelled().is_empty());
}

#[tokio::test]
async fn delete_while_pending_cancels_job() {
    let config = test_config(47220, 47230, 200);
    let scheduler = FakeScheduler::new("PENDING", None);
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "bob")
        .await
        .expect("create");
    wait_for_status(&store, &created.id, SessionStatus::Pending).await;

    orch.delete_session(&created.id).await.expect("delete");
    assert_eq!(scheduler.cancelled(), vec!["42".to_owned()]);
    assert_eq!(launcher.launched(), 0);
}

#[tokio::test]
async fn restart_leaves_exactly_one_forwarder() {
    let config = test_config(47230, 47240, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "carol")
        .await
        .expect("create");
    let first = wait_for_tunnel(&store, &created.id).await;

    let restarted = orch.restart_session(&created.id).await.expect("restart");
    assert_eq!(restarted.id, created.id);
    assert_eq!(restarted.status, SessionStatus::Creating);
    assert_eq!(restarted.service_port, first.service_port);
    assert!(restarted.job_id.is_none());
    assert!(restarted.node.is_none());
    assert!(restarted.tunnel_port.is_none());

    let second = wait_for(&store, &created.id, Duration::from_secs(5), |s| {
        s.job_id.as_deref() == Some("43") && s.tunnel_port.is_some()
    })
    .await;
    assert_eq!(second.status, SessionStatus::Running);
    assert_eq!(second.service_port, first.service_port);

    assert!(scheduler.cancelled().contains(&"42".to_owned()));
    assert_eq!(launcher.launched(), 2);
    assert_eq!(
        launcher.alive_for(&created.id),
        vec![second.tunnel_port.expect("tunnel port")]
    );
    assert_eq!(orch.open_tunnels().await, 1);

    orch.shutdown().await;
}

#[tokio::test]
async fn restart_from_stopped_submits_again() {
    let config = test_config(47240, 47250, 20);
    let scheduler = FakeScheduler::new("COMPLETED", None);
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "dave")
        .await
        .expect("create");
    wait_for_status(&store, &created.id, SessionStatus::Stopped).await;

    orch.restart_session(&created.id).await.expect("restart");
    let session = wait_for(&store, &created.id, Duration::from_secs(5), |s| {
        s.status == SessionStatus::Stopped && s.job_id.as_deref() == Some("43")
    })
    .await;
    assert!(session.error.is_none());
    assert_eq!(scheduler.submits().len(), 2);
}

#[tokio::test]
async fn restart_while_pending_is_invalid_state() {
    let config = test_config(47250, 47260, 200);
    let scheduler = FakeScheduler::new("PENDING", None);
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "erin")
        .await
        .expect("create");
    wait_for_status(&store, &created.id, SessionStatus::Pending).await;

    let result = orch.restart_session(&created.id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
    assert!(scheduler.cancelled().is_empty());

    orch.shutdown().await;
}

#[tokio::test]
async fn restart_unknown_session_is_not_found() {
    let config = test_config(47260, 47270, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, _store) = orchestrator(&config, &scheduler, &launcher).await;

    let result = orch.restart_session("missing").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn get_cancels_session_whose_job_vanished() {
    let config = test_config(47270, 47280, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "frank")
        .await
        .expect("create");
    wait_for_tunnel(&store, &created.id).await;

    scheduler.vanish("42");
    let session = orch.get_session(&created.id).await.expect("get");

    assert_eq!(session.status, SessionStatus::Cancelled);
    assert!(session.tunnel_port.is_none());
    assert!(session.endpoint.is_none());
    assert_eq!(launcher.alive(), 0);
    assert!(orch.job_record(&created.id).await.is_none());

    let again = orch.get_session(&created.id).await.expect("get again");
    assert_eq!(again.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn stale_liveness_check_leaves_restarted_session_alone() {
    let config = test_config(47350, 47360, 20);
    let scheduler = FakeScheduler::running();
    let gated = GatedScheduler::new(Arc::clone(&scheduler));
    let launcher = FakeLauncher::listening();
    let (orch, store) =
        orchestrator_with_runner(&config, Arc::clone(&gated) as Arc<dyn CommandRunner>, &launcher)
            .await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "judy")
        .await
        .expect("create");
    wait_for_tunnel(&store, &created.id).await;

    scheduler.vanish("42");
    gated.arm("42");
    let reader = orch.clone();
    let id = created.id.clone();
    let stale_get = tokio::spawn(async move { reader.get_session(&id).await });
    gated.entered().await;

    orch.restart_session(&created.id).await.expect("restart");
    wait_for(&store, &created.id, Duration::from_secs(5), |s| {
        s.job_id.as_deref() == Some("43") && s.tunnel_port.is_some()
    })
    .await;

    gated.release();
    let seen = stale_get.await.expect("join").expect("get");
    assert_eq!(seen.status, SessionStatus::Running);
    assert_eq!(seen.job_id.as_deref(), Some("43"));

    let stored = store
        .get(&created.id)
        .await
        .expect("read")
        .expect("record");
    assert_eq!(stored.status, SessionStatus::Running);
    assert!(stored.tunnel_port.is_some());
    assert_eq!(scheduler.cancelled(), vec!["42".to_owned()]);
    assert_eq!(
        launcher.alive_for(&created.id),
        vec![stored.tunnel_port.expect("tunnel port")]
    );
    assert_eq!(orch.active_workers().await, 1);

    orch.shutdown().await;
}

#[tokio::test]
async fn get_without_reconciliation_returns_stored_record() {
    let mut config = test_config(47280, 47290, 20);
    config.reconcile_on_get = false;
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "grace")
        .await
        .expect("create");
    wait_for_tunnel(&store, &created.id).await;

    scheduler.vanish("42");
    let session = orch.get_session(&created.id).await.expect("get");
    assert_eq!(session.status, SessionStatus::Running);

    orch.shutdown().await;
}

#[tokio::test]
async fn dead_forwarder_with_running_job_is_tunnel_lost() {
    let config = test_config(47290, 47300, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "heidi")
        .await
        .expect("create");
    wait_for_tunnel(&store, &created.id).await;

    launcher.kill_session(&created.id);
    let session = wait_for_status(&store, &created.id, SessionStatus::Error).await;

    let error = session.error.expect("error recorded");
    assert!(error.starts_with("tunnel lost:"), "got: {error}");
    assert!(session.tunnel_port.is_none());
    assert_eq!(orch.open_tunnels().await, 0);
    assert_eq!(scheduler.cancelled(), vec!["42".to_owned()]);
    wait_for_idle(&orch).await;
}

#[tokio::test]
async fn dead_forwarder_with_finished_job_stops_session() {
    let config = test_config(47300, 47310, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "ivan")
        .await
        .expect("create");
    wait_for_tunnel(&store, &created.id).await;

    scheduler.set_job("42", "COMPLETED", Some("n1"));
    launcher.kill_session(&created.id);
    let session = wait_for_status(&store, &created.id, SessionStatus::Stopped).await;

    assert!(session.error.is_none());
    assert!(session.tunnel_port.is_none());
    assert!(orch.job_record(&created.id).await.is_none());
    assert!(scheduler.cancelled().is_empty());
}

#[tokio::test]
async fn observed_statuses_follow_the_state_graph() {
    let config = test_config(47310, 47320, 20);
    let scheduler = FakeScheduler::new("PENDING", None);
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "judy")
        .await
        .expect("create");

    let mut observed = vec![created.status];
    let mut released = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let session = store
            .get(&created.id)
            .await
            .expect("read")
            .expect("present");
        if observed.last() != Some(&session.status) {
            observed.push(session.status);
        }
        if session.status == SessionStatus::Pending && !released {
            scheduler.set_job("42", "RUNNING", Some("n2"));
            released = true;
        }
        if session.tunnel_port.is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "stuck at {observed:?}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let path = [
        SessionStatus::Creating,
        SessionStatus::Pending,
        SessionStatus::Running,
    ];
    let mut cursor = path.iter();
    for status in &observed {
        assert!(
            cursor.any(|p| p == status),
            "observed statuses {observed:?} leave the creation path"
        );
    }
    assert_eq!(observed.last(), Some(&SessionStatus::Running));

    orch.shutdown().await;
}

#[tokio::test]
async fn resume_all_recovers_live_sessions() {
    let config = test_config(47320, 47330, 500);
    let scheduler = FakeScheduler::running();
    scheduler.set_job("77", "RUNNING", Some("n1"));
    scheduler.set_job("78", "PENDING", None);
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let interrupted = Session::new("a".into(), "svcA".into(), SessionConfig::default(), 46050);
    store.put(&interrupted, config.ttl()).await.expect("put");

    let mut was_running = Session::new("b".into(), "svcA".into(), SessionConfig::default(), 46051);
    was_running.status = SessionStatus::Running;
    was_running.job_id = Some("77".into());
    was_running.node = Some("n1".into());
    was_running.tunnel_port = Some(47329);
    was_running.endpoint = Some("gateway.example:47329".into());
    store.put(&was_running, config.ttl()).await.expect("put");

    let mut was_pending = Session::new("c".into(), "svcA".into(), SessionConfig::default(), 46052);
    was_pending.status = SessionStatus::Pending;
    was_pending.job_id = Some("78".into());
    store.put(&was_pending, config.ttl()).await.expect("put");

    let resumed = orch.resume_all().await.expect("resume");
    assert_eq!(resumed, 2);

    let failed = wait_for_status(&store, &interrupted.id, SessionStatus::Error).await;
    assert_eq!(failed.error.as_deref(), Some("interrupted before submission"));

    let running = wait_for_tunnel(&store, &was_running.id).await;
    assert_eq!(running.job_id.as_deref(), Some("77"));
    assert_ne!(running.tunnel_port, Some(47329));

    let pending = store
        .get(&was_pending.id)
        .await
        .expect("read")
        .expect("present");
    assert_eq!(pending.status, SessionStatus::Pending);
    let job = orch.job_record(&was_pending.id).await.expect("job record");
    assert_eq!(job.job_id, "78");

    assert_eq!(scheduler.submits().len(), 0);
    orch.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_tunnels_but_keeps_records_and_jobs() {
    let config = test_config(47330, 47340, 20);
    let scheduler = FakeScheduler::running();
    let launcher = FakeLauncher::listening();
    let (orch, store) = orchestrator(&config, &scheduler, &launcher).await;

    let created = orch
        .create_session("svcA", SessionConfig::default(), "kim")
        .await
        .expect("create");
    wait_for_tunnel(&store, &created.id).await;

    orch.shutdown().await;

    assert_eq!(launcher.alive(), 0);
    assert_eq!(orch.active_workers().await, 0);
    assert!(scheduler.cancelled().is_empty());
    let stored = store
        .get(&created.id)
        .await
        .expect("read")
        .expect("record kept");
    assert_eq!(stored.status, SessionStatus::Running);
    assert_eq!(stored.job_id.as_deref(), Some("42"));
}
