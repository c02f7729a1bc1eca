//! Config parsing, defaults and validation.

use session_orchestrator::config::{GlobalConfig, NodeResolverKind};
use session_orchestrator::AppError;

fn minimal_toml() -> String {
    r#"
[store]
path = "sessions.db"

[ports]
service = { low = 5900, high = 6000 }
tunnel = { low = 8000, high = 8100 }

[apps.desktop]
script = "/opt/apps/desktop.sbatch"
"#
    .to_owned()
}

#[test]
fn minimal_config_fills_defaults() {
    let config = GlobalConfig::from_toml_str(&minimal_toml()).expect("valid config");

    assert_eq!(config.ipc_name, "session-orchestrator");
    assert!(config.ipc_auth_token.is_none());
    assert!(config.reconcile_on_get);
    assert_eq!(config.node_resolver, NodeResolverKind::Static);
    assert_eq!(config.store.namespace, "sessions");
    assert_eq!(config.ttl().as_secs(), 604_800);
    assert_eq!(config.scheduler.submit_command, "sbatch");
    assert_eq!(config.scheduler.query_command, "scontrol");
    assert_eq!(config.scheduler.cancel_command, "scancel");
    assert_eq!(config.monitor.max_attempts, 60);
    assert_eq!(config.monitor.poll_interval().as_millis(), 1000);
    assert_eq!(config.tunnel.ssh_command, "ssh");
    assert_eq!(config.tunnel.probe_attempts, 30);
    assert_eq!(config.ports.tunnel.len(), 100);
    assert_eq!(config.apps["desktop"].script, "/opt/apps/desktop.sbatch");
}

#[test]
fn overrides_are_parsed() {
    let raw = format!(
        "{}\n{}",
        r#"
ipc_auth_token = "s3cret"
reconcile_on_get = false
node_resolver = "scheduler"
"#,
        minimal_toml()
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid config");

    assert_eq!(config.ipc_auth_token.as_deref(), Some("s3cret"));
    assert!(!config.reconcile_on_get);
    assert_eq!(config.node_resolver, NodeResolverKind::Scheduler);
}

#[test]
fn overlapping_pools_are_rejected() {
    let raw = minimal_toml().replace("low = 8000, high = 8100", "low = 5950, high = 6050");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("overlap");
    assert_eq!(
        err,
        AppError::Config("ports.service and ports.tunnel must be disjoint".into())
    );
}

#[test]
fn empty_pool_is_rejected() {
    let raw = minimal_toml().replace("low = 8000, high = 8100", "low = 8000, high = 8000");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("empty");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("ports.tunnel")));
}

#[test]
fn zero_budgets_are_rejected() {
    let raw = format!("{}\n[monitor]\nmax_attempts = 0\n", minimal_toml());
    assert!(GlobalConfig::from_toml_str(&raw).is_err());

    let raw = format!("{}\n[tunnel]\nprobe_attempts = 0\n", minimal_toml());
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn zero_health_interval_is_rejected() {
    let raw = format!("{}\n[tunnel]\nhealth_interval_seconds = 0\n", minimal_toml());
    let err = GlobalConfig::from_toml_str(&raw).expect_err("zero interval");
    assert_eq!(
        err,
        AppError::Config("tunnel.health_interval_seconds must be greater than zero".into())
    );
}

#[test]
fn app_without_script_is_rejected() {
    let raw = minimal_toml().replace("script = \"/opt/apps/desktop.sbatch\"", "script = \"\"");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("missing script");
    assert_eq!(err, AppError::Config("apps.desktop.script must be set".into()));
}

#[test]
fn malformed_toml_is_config_error() {
    let err = GlobalConfig::from_toml_str("[ports\nservice = 1").expect_err("bad toml");
    assert!(err.to_string().starts_with("config: invalid config:"));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, minimal_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.ports.service.low, 5900);

    let missing = GlobalConfig::load_from_path(dir.path().join("absent.toml"));
    assert!(matches!(missing, Err(AppError::Config(_))));
}
