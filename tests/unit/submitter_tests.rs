//! Submit line construction and job id parsing.

use std::collections::HashMap;
use std::sync::Arc;

use session_orchestrator::config::{AppConfig, SchedulerConfig};
use session_orchestrator::models::session::{Session, SessionConfig};
use session_orchestrator::scheduler::submitter::JobSubmitter;
use session_orchestrator::AppError;

use super::support::ScriptedRunner;

fn apps() -> HashMap<String, AppConfig> {
    let desktop = AppConfig {
        script: "/opt/apps/desktop.sbatch".into(),
        args: vec!["--vnc".into()],
        partition: Some("interactive".into()),
        cpus: Some(2),
        memory: Some("4G".into()),
        time_limit: Some("02:00:00".into()),
    };
    HashMap::from([("desktop".to_owned(), desktop)])
}

fn submitter(runner: &Arc<ScriptedRunner>) -> JobSubmitter {
    JobSubmitter::new(runner.clone(), SchedulerConfig::default(), apps())
}

fn session(config: SessionConfig) -> Session {
    Session::new("alice".into(), "desktop".into(), config, 5901)
}

#[test]
fn app_defaults_fill_the_command_line() {
    let runner = Arc::new(ScriptedRunner::default());
    let session = session(SessionConfig::default());
    let args = submitter(&runner).render_args(&session).expect("args");

    let short_id: String = session.id.chars().take(8).collect();
    assert_eq!(args[0], format!("--job-name=session-{short_id}"));
    assert_eq!(
        args[1],
        format!(
            "--export=ALL,SESSION_ID={},SERVICE_PORT=5901,APP_ID=desktop",
            session.id
        )
    );
    assert_eq!(
        &args[2..],
        [
            "--partition=interactive",
            "--cpus-per-task=2",
            "--mem=4G",
            "--time=02:00:00",
            "/opt/apps/desktop.sbatch",
            "--vnc",
        ]
    );
}

#[test]
fn session_overrides_win() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut config = SessionConfig {
        partition: Some("gpu".into()),
        cpus: Some(16),
        ..SessionConfig::default()
    };
    config.env.insert("GEOMETRY".into(), "1920x1080".into());
    let args = submitter(&runner).render_args(&session(config)).expect("args");

    assert!(args.contains(&"--partition=gpu".to_owned()));
    assert!(args.contains(&"--cpus-per-task=16".to_owned()));
    assert!(args.contains(&"--mem=4G".to_owned()));
    assert!(args[1].ends_with(",GEOMETRY=1920x1080"));
}

#[test]
fn values_with_commas_cannot_be_exported() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut config = SessionConfig::default();
    config.env.insert("LIST".into(), "a,b".into());

    let err = submitter(&runner)
        .render_args(&session(config))
        .expect_err("comma");
    assert!(matches!(err, AppError::SubmissionFailed(_)));
}

#[test]
fn unknown_app_is_not_found() {
    let runner = Arc::new(ScriptedRunner::default());
    let submitter = submitter(&runner);
    let mut session = session(SessionConfig::default());
    session.app_id = "nope".into();

    assert!(!submitter.has_app("nope"));
    assert!(submitter.has_app("desktop"));
    assert_eq!(
        submitter.render_args(&session).expect_err("unknown"),
        AppError::NotFound("app nope".into())
    );
}

#[tokio::test]
async fn submit_returns_the_job_id() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.ok("sbatch", "Submitted batch job 1234\n");

    let job_id = submitter(&runner)
        .submit(&session(SessionConfig::default()))
        .await
        .expect("submit");

    assert_eq!(job_id, "1234");
    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "sbatch");
    assert_eq!(calls[0].1.last().map(String::as_str), Some("--vnc"));
}

#[tokio::test]
async fn rejected_submission_carries_stderr() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.fail("sbatch", 1, "sbatch: error: Batch job submission failed: Invalid partition name\n");

    let err = submitter(&runner)
        .submit(&session(SessionConfig::default()))
        .await
        .expect_err("rejected");

    assert_eq!(
        err.to_string(),
        "submission failed: exit 1: sbatch: error: Batch job submission failed: Invalid partition name"
    );
    assert_eq!(runner.calls_to("sbatch"), 1, "no retry");
}

#[tokio::test]
async fn output_without_job_id_is_a_failure() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.ok("sbatch", "queued\n");

    let err = submitter(&runner)
        .submit(&session(SessionConfig::default()))
        .await
        .expect_err("no id");
    assert_eq!(
        err,
        AppError::SubmissionFailed("no job id in submit output".into())
    );
}

#[tokio::test]
async fn runner_failure_is_a_submission_failure() {
    let runner = Arc::new(ScriptedRunner::default());
    runner.error("sbatch", "failed to run sbatch: No such file or directory");

    let err = submitter(&runner)
        .submit(&session(SessionConfig::default()))
        .await
        .expect_err("spawn");
    assert!(matches!(err, AppError::SubmissionFailed(msg) if msg.contains("No such file")));
}
