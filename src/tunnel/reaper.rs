//! Find and signal forwarders by the local port they serve.
//!
//! A forwarder whose handle was lost (orchestrator restart, a client
//! that forked) is still identifiable by its `-L` argument. On Linux the
//! process table is read from `/proc`; elsewhere nothing is found.

use std::path::Path;

use tracing::{info, warn};

/// Whether a forward spec (`[bind:]port:host:hostport`) listens on `port`.
#[must_use]
pub fn spec_listens_on(spec: &str, port: u16) -> bool {
    let parts: Vec<&str> = spec.split(':').collect();
    let listen = match parts.len() {
        3 => parts[0],
        4 => parts[1],
        _ => return false,
    };
    listen.parse::<u16>().is_ok_and(|p| p == port)
}

/// Whether `argv` is an invocation of `program` forwarding local `port`.
#[must_use]
pub fn forwards_port(argv: &[String], program: &str, port: u16) -> bool {
    let Some(exe) = argv.first() else {
        return false;
    };
    let wanted = Path::new(program).file_name();
    if wanted.is_none() || Path::new(exe).file_name() != wanted {
        return false;
    }

    let mut args = argv.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-L" {
            if args.next().is_some_and(|spec| spec_listens_on(spec, port)) {
                return true;
            }
        } else if let Some(spec) = arg.strip_prefix("-L") {
            if spec_listens_on(spec, port) {
                return true;
            }
        }
    }
    false
}

/// Pids of `program` processes forwarding local `port`.
#[cfg(target_os = "linux")]
#[must_use]
pub fn find_forwarders(program: &str, port: u16) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            std::fs::read(format!("/proc/{pid}/cmdline")).is_ok_and(|raw| {
                let argv: Vec<String> = raw
                    .split(|b| *b == 0)
                    .filter(|part| !part.is_empty())
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect();
                forwards_port(&argv, program, port)
            })
        })
        .collect()
}

/// Pids of `program` processes forwarding local `port`.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn find_forwarders(_program: &str, _port: u16) -> Vec<u32> {
    Vec::new()
}

/// Send SIGTERM to every forwarder of `port`; returns how many were signalled.
#[cfg(unix)]
pub fn signal_forwarders(program: &str, port: u16) -> usize {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let mut signalled = 0;
    for pid in find_forwarders(program, port) {
        let Ok(raw) = i32::try_from(pid) else {
            continue;
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                info!(pid, port, "signalled stray forwarder");
                signalled += 1;
            }
            Err(err) => warn!(pid, port, %err, "failed to signal stray forwarder"),
        }
    }
    signalled
}

/// Send SIGTERM to every forwarder of `port`; returns how many were signalled.
#[cfg(not(unix))]
pub fn signal_forwarders(_program: &str, _port: u16) -> usize {
    0
}
