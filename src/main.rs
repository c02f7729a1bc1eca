#![forbid(unsafe_code)]

//! `session-orchestrator` — interactive batch session daemon.
//!
//! Bootstraps configuration and the session store, recovers sessions left
//! live by a previous run, and serves the local control socket for
//! `session-orchestrator-ctl`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use session_orchestrator::config::GlobalConfig;
use session_orchestrator::ipc::server::{spawn_ipc_server, IpcState};
use session_orchestrator::orchestrator::session_manager::SessionOrchestrator;
use session_orchestrator::persistence::expiry;
use session_orchestrator::persistence::{db, session_store::SessionStore};
use session_orchestrator::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "session-orchestrator",
    about = "Interactive batch session orchestrator",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "SESSION_ORCHESTRATOR_CONFIG")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the control socket name from the config file.
    #[arg(long)]
    ipc_name: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("session-orchestrator bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(name) = args.ipc_name {
        config.ipc_name = name;
    }
    info!(apps = config.apps.len(), "configuration loaded");

    // ── Open session store ──────────────────────────────
    let pool = Arc::new(db::connect(&config.store.path).await?);
    let store = SessionStore::new(pool, config.store.namespace.clone());

    let ct = CancellationToken::new();
    let expiry_handle = expiry::spawn_expiry_task(
        store.clone(),
        Duration::from_secs(config.store.sweep_interval_seconds),
        ct.clone(),
    );
    info!("expiry sweeper started");

    // ── Build orchestrator and recover live sessions ────
    let orchestrator = SessionOrchestrator::from_config(&config, store);
    match orchestrator.resume_all().await {
        Ok(resumed) => info!(resumed, "startup recovery complete"),
        Err(err) => error!(%err, "startup recovery failed"),
    }

    // ── Start control socket ────────────────────────────
    let state = Arc::new(IpcState {
        orchestrator: orchestrator.clone(),
        auth_token: config.ipc_auth_token.clone(),
    });
    let ipc_handle = spawn_ipc_server(&config.ipc_name, state, ct.clone())?;

    info!("session orchestrator ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    orchestrator.shutdown().await;

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(ipc_handle, expiry_handle);
    info!("session-orchestrator shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
