//! Session orchestration.
//!
//! [`session_manager::SessionOrchestrator`] owns the session state
//! machine; one [`worker`] task per session drives submission, monitoring
//! and tunnelling, tracked in the [`registry`].

pub mod registry;
pub mod session_manager;
pub mod worker;
