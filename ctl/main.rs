#![forbid(unsafe_code)]

//! `session-orchestrator-ctl` — local CLI companion for `session-orchestrator`.
//!
//! Connects to the control socket and sends JSON commands to the daemon.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "session-orchestrator-ctl",
    about = "Local CLI for the session orchestrator daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Control socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "session-orchestrator")]
    ipc_name: String,

    /// Shared secret, when the daemon sets `ipc_auth_token`.
    #[arg(long, env = "SESSION_ORCHESTRATOR_TOKEN")]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a session for an app.
    Create {
        /// App identifier from the daemon config.
        app_id: String,
        /// Owning user; defaults to `$USER`.
        #[arg(long, env = "USER")]
        owner: Option<String>,
        /// Scheduler partition override.
        #[arg(long)]
        partition: Option<String>,
        /// CPUs per task override.
        #[arg(long)]
        cpus: Option<u32>,
        /// Memory override, e.g. `8G`.
        #[arg(long)]
        memory: Option<String>,
        /// Wall-clock limit override, e.g. `04:00:00`.
        #[arg(long)]
        time_limit: Option<String>,
        /// Extra job environment as `KEY=VALUE`; repeatable.
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
    },

    /// Show one session.
    Get {
        /// Session ID.
        id: String,
    },

    /// List sessions.
    List,

    /// Delete a session, cancelling its job and tunnel.
    Delete {
        /// Session ID.
        id: String,
    },

    /// Restart a session with a fresh job.
    Restart {
        /// Session ID.
        id: String,
    },
}

fn parse_env(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn build_request(command: &Command) -> serde_json::Value {
    match command {
        Command::Create {
            app_id,
            owner,
            partition,
            cpus,
            memory,
            time_limit,
            env,
        } => {
            let env: serde_json::Map<String, serde_json::Value> = env
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let mut req = serde_json::json!({
                "command": "create",
                "app_id": app_id,
                "config": {
                    "partition": partition,
                    "cpus": cpus,
                    "memory": memory,
                    "time_limit": time_limit,
                    "env": env,
                },
            });
            if let Some(owner) = owner {
                req["owner"] = serde_json::Value::String(owner.clone());
            }
            req
        }
        Command::Get { id } => serde_json::json!({ "command": "get", "id": id }),
        Command::List => serde_json::json!({ "command": "list" }),
        Command::Delete { id } => serde_json::json!({ "command": "delete", "id": id }),
        Command::Restart { id } => serde_json::json!({ "command": "restart", "id": id }),
    }
}

fn main() {
    let args = Cli::parse();

    let mut request_json = build_request(&args.command);
    if let Some(ref token) = args.auth_token {
        request_json["auth_token"] = serde_json::Value::String(token.clone());
    }

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!(
                "Is session-orchestrator running with ipc_name '{}'?",
                args.ipc_name
            );
            std::process::exit(1);
        }
    }
}

/// Connect to the control socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
