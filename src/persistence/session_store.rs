//! TTL-backed session store on `SQLite`.
//!
//! Records are JSON payloads keyed by session id under a per-service
//! namespace. Every write refreshes the record's expiry; expired records
//! read as absent until the sweeper removes them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::models::session::Session;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
    namespace: String,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl_ms)
}

fn decode(payload: &str) -> Result<Session> {
    serde_json::from_str(payload).map_err(|e| AppError::Db(format!("invalid session payload: {e}")))
}

impl SessionStore {
    /// Create a store bound to `namespace`.
    #[must_use]
    pub fn new(db: Arc<Database>, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }

    /// Namespace this store reads and writes.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Retrieve a live session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the payload is corrupt.
    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM session_record
             WHERE namespace = ?1 AND id = ?2 AND expires_at > ?3",
        )
        .bind(&self.namespace)
        .bind(id)
        .bind(now_millis())
        .fetch_optional(self.db.as_ref())
        .await?;

        payload.as_deref().map(decode).transpose()
    }

    /// Insert or replace a record, refresh its TTL and index its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the write fails.
    pub async fn put(&self, session: &Session, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(session)
            .map_err(|e| AppError::Db(format!("serialize session: {e}")))?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO session_record (namespace, id, payload, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, id) DO UPDATE
             SET payload = excluded.payload, expires_at = excluded.expires_at",
        )
        .bind(&self.namespace)
        .bind(&session.id)
        .bind(&payload)
        .bind(expiry_millis(ttl))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO session_index (namespace, id) VALUES (?1, ?2)")
            .bind(&self.namespace)
            .bind(&session.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove a record and its index entry.
    ///
    /// Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        let removed = sqlx::query("DELETE FROM session_record WHERE namespace = ?1 AND id = ?2")
            .bind(&self.namespace)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM session_index WHERE namespace = ?1 AND id = ?2")
            .bind(&self.namespace)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Check whether a live record exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM session_record
             WHERE namespace = ?1 AND id = ?2 AND expires_at > ?3",
        )
        .bind(&self.namespace)
        .bind(id)
        .bind(now_millis())
        .fetch_optional(self.db.as_ref())
        .await?;
        Ok(found.is_some())
    }

    /// All ids in the namespace index, including ones whose record has
    /// expired but not yet been swept.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM session_index WHERE namespace = ?1 ORDER BY id")
            .bind(&self.namespace)
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(ids)
    }

    /// All live sessions reachable through the index, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a payload is corrupt.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT r.payload FROM session_index i
             JOIN session_record r ON r.namespace = i.namespace AND r.id = i.id
             WHERE i.namespace = ?1 AND r.expires_at > ?2",
        )
        .bind(&self.namespace)
        .bind(now_millis())
        .fetch_all(self.db.as_ref())
        .await?;

        let mut sessions = payloads
            .iter()
            .map(String::as_str)
            .map(decode)
            .collect::<Result<Vec<_>>>()?;
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Delete expired records and prune index entries without a record.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        let removed =
            sqlx::query("DELETE FROM session_record WHERE namespace = ?1 AND expires_at <= ?2")
                .bind(&self.namespace)
                .bind(now_millis())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        sqlx::query(
            "DELETE FROM session_index WHERE namespace = ?1 AND id NOT IN
             (SELECT id FROM session_record WHERE namespace = ?1)",
        )
        .bind(&self.namespace)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(removed)
    }
}
