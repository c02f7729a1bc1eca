//! SSH tunnel management.
//!
//! Forwarders are spawned through a [`process::ProcessLauncher`], probed
//! for readiness, tracked one per session, and torn down by handle or,
//! failing that, by the local port they serve.

pub mod establisher;
pub mod probe;
pub mod process;
pub mod reaper;
pub mod ssh;
