//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `IF NOT EXISTS`, so bootstrapping on every start
//! converges to the same layout.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the record and index tables.
///
/// `session_record` holds one JSON payload per session with an absolute
/// expiry in unix milliseconds. `session_index` is the per-namespace set
/// of session ids used for enumeration.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session_record (
    namespace   TEXT NOT NULL,
    id          TEXT NOT NULL,
    payload     TEXT NOT NULL,
    expires_at  INTEGER NOT NULL,
    PRIMARY KEY (namespace, id)
);

CREATE TABLE IF NOT EXISTS session_index (
    namespace   TEXT NOT NULL,
    id          TEXT NOT NULL,
    PRIMARY KEY (namespace, id)
);

CREATE INDEX IF NOT EXISTS idx_session_record_expiry ON session_record(expires_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
