#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod ports;
pub mod scheduler;
pub mod tunnel;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
