//! Local control socket for `session-orchestrator-ctl`.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the [`SessionOrchestrator`].
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "create", "app_id": "desktop", "owner": "alice", "config": {"cpus": 4}}
//! {"command": "get", "id": "4f0c..."}
//! {"command": "list"}
//! {"command": "delete", "id": "4f0c..."}
//! {"command": "restart", "id": "4f0c..."}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: session 4f0c..."}
//! ```

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::session::SessionConfig;
use crate::orchestrator::session_manager::SessionOrchestrator;
use crate::{AppError, Result};

/// Shared state for control-socket connections.
pub struct IpcState {
    /// Session façade the commands are routed to.
    pub orchestrator: SessionOrchestrator,
    /// Shared secret required on every request when set.
    pub auth_token: Option<String>,
}

/// Inbound control request.
#[derive(Debug, Default, Deserialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Session identifier (`get`, `delete`, `restart`).
    #[serde(default)]
    pub id: Option<String>,
    /// Service to launch (`create`).
    #[serde(default)]
    pub app_id: Option<String>,
    /// Requesting user (`create`).
    #[serde(default)]
    pub owner: Option<String>,
    /// Submission overrides (`create`).
    #[serde(default)]
    pub config: Option<SessionConfig>,
    /// Shared-secret authentication token.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Outbound control response.
#[derive(Debug, Serialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(data) => Self::success(data),
                Err(err) => Self::error(format!("serialization failed: {err}")),
            },
            Err(err) => Self::error(err.to_string()),
        }
    }
}

/// Spawn the control socket server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
    state: Arc<IpcState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "control socket listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("control socket shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state));
                            }
                            Err(err) => {
                                warn!(%err, "control socket accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single client connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, state: Arc<IpcState>) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &state).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("control connection closed");
    }
    .instrument(span)
    .await;
}

/// Route one request to the orchestrator.
pub async fn dispatch_command(request: &IpcRequest, state: &IpcState) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async {
        if let Some(ref expected) = state.auth_token {
            match request.auth_token {
                Some(ref provided) if provided == expected => {}
                _ => {
                    warn!("control request rejected: invalid auth token");
                    return IpcResponse::error("unauthorized");
                }
            }
        }

        let orchestrator = &state.orchestrator;
        match request.command.as_str() {
            "list" => IpcResponse::from_result(
                orchestrator
                    .list_sessions()
                    .await
                    .map(|sessions| serde_json::json!({ "sessions": sessions })),
            ),
            "create" => {
                let Some(ref app_id) = request.app_id else {
                    return IpcResponse::error("missing required 'app_id' field");
                };
                let owner = request.owner.as_deref().unwrap_or("operator");
                let config = request.config.clone().unwrap_or_default();
                IpcResponse::from_result(orchestrator.create_session(app_id, config, owner).await)
            }
            "get" | "delete" | "restart" => {
                let Some(ref id) = request.id else {
                    return IpcResponse::error("missing required 'id' field");
                };
                match request.command.as_str() {
                    "get" => IpcResponse::from_result(orchestrator.get_session(id).await),
                    "delete" => IpcResponse::from_result(
                        orchestrator
                            .delete_session(id)
                            .await
                            .map(|()| serde_json::json!({ "id": id, "deleted": true })),
                    ),
                    _ => IpcResponse::from_result(orchestrator.restart_session(id).await),
                }
            }
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(span)
    .await
}
