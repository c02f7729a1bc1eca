//! Job and node queries and job cancellation through the scheduler CLI.

use std::collections::HashMap;
use std::sync::Arc;

use session_orchestrator::config::SchedulerConfig;
use session_orchestrator::models::job::JobState;
use session_orchestrator::scheduler::client::{JobLookup, SchedulerClient};
use session_orchestrator::scheduler::resolver::{
    NodeResolver, SchedulerNodeResolver, StaticNodeResolver,
};
use session_orchestrator::AppError;

use super::support::ScriptedRunner;

fn client(runner: &Arc<ScriptedRunner>) -> SchedulerClient {
    SchedulerClient::new(runner.clone(), SchedulerConfig::default())
}

#[tokio::test]
async fn running_job_reports_state_and_nodes() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.ok(
        "scontrol",
        "JobId=42 JobName=session-ab\n   JobState=RUNNING Reason=None\n   NodeList=gpu[01-02]\n",
    );

    let lookup = client(&runner).query_job("42").await.expect("query");
    let JobLookup::Found(snapshot) = lookup else {
        panic!("expected a found job, got {lookup:?}");
    };
    assert_eq!(snapshot.state, JobState::Running);
    assert_eq!(snapshot.state_token, "RUNNING");
    assert_eq!(snapshot.node_list.as_deref(), Some("gpu[01-02]"));
    assert_eq!(
        runner.calls()[0].1,
        vec!["show".to_owned(), "job".to_owned(), "42".to_owned()]
    );
}

#[tokio::test]
async fn invalid_job_id_is_unknown() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.fail("scontrol", 1, "slurm_load_jobs error: Invalid job id specified");

    assert_eq!(
        client(&runner).query_job("42").await.expect("query"),
        JobLookup::Unknown
    );
}

#[tokio::test]
async fn other_query_failures_are_scheduler_errors() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.fail("scontrol", 1, "slurm_load_jobs error: Unable to contact slurm controller");

    let err = client(&runner).query_job("42").await.expect_err("failure");
    assert!(matches!(err, AppError::Scheduler(msg) if msg.contains("Unable to contact")));
}

#[tokio::test]
async fn output_without_state_is_an_error() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.ok("scontrol", "JobId=42 JobName=x");

    let err = client(&runner).query_job("42").await.expect_err("no state");
    assert_eq!(err, AppError::Scheduler("no JobState for job 42".into()));
}

#[tokio::test]
async fn cancel_invokes_the_cancel_command() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.ok("scancel", "");

    client(&runner).cancel("42").await.expect("cancel");
    assert_eq!(runner.calls(), vec![("scancel".to_owned(), vec!["42".to_owned()])]);
}

#[tokio::test]
async fn failed_cancel_is_reported() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.fail("scancel", 1, "scancel: error: Kill job error on job id 42");

    let err = client(&runner).cancel("42").await.expect_err("cancel");
    assert!(err.to_string().starts_with("scheduler: cancel of 42 failed (exit 1:"));
}

#[tokio::test]
async fn scheduler_resolver_uses_node_addr() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.ok("scontrol", "NodeName=gpu01 Arch=x86_64 NodeAddr=10.1.0.17 NodeHostName=gpu01");
    runner.ok("scontrol", "NodeName=gpu02 Arch=x86_64");
    let resolver = SchedulerNodeResolver::new(Arc::new(client(&runner)));

    assert_eq!(resolver.resolve("gpu01").await.expect("resolve"), "10.1.0.17");
    assert_eq!(resolver.resolve("gpu02").await.expect("fallback"), "gpu02");
}

#[tokio::test]
async fn static_resolver_falls_back_to_the_name() {
    let resolver = StaticNodeResolver::new(HashMap::from([(
        "gpu01".to_owned(),
        "10.1.0.17".to_owned(),
    )]));
    assert_eq!(resolver.resolve("gpu01").await.expect("resolve"), "10.1.0.17");
    assert_eq!(resolver.resolve("gpu09").await.expect("resolve"), "gpu09");
}
