//! Batch scheduler integration.
//!
//! Covers job submission, bounded state polling, node address resolution
//! and cancellation, all through the scheduler's command-line surface.

pub mod client;
pub mod monitor;
pub mod parse;
pub mod resolver;
pub mod runner;
pub mod submitter;
