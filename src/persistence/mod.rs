//! Persistence layer modules.

pub mod db;
pub mod expiry;
pub mod schema;
pub mod session_store;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
