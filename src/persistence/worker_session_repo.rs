//! Worker-session repository — the persisted copy of the `MTProto` session blob.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::Result;

use super::db::Database;

/// Fixed key of the single session row.
const DEFAULT_SESSION: &str = "default";

/// Repository over the `worker_session` table.
#[derive(Clone)]
pub struct WorkerSessionRepo {
    db: Arc<Database>,
}

impl WorkerSessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load the persisted session bytes, with their last-updated stamp.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn load(&self) -> Result<Option<(Vec<u8>, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT session_data, updated_at FROM worker_session WHERE session_name = $1",
        )
        .bind(DEFAULT_SESSION)
        .fetch_optional(self.db.as_ref())
        .await?;

        Ok(row.map(|r| (r.get("session_data"), r.get("updated_at"))))
    }

    /// Upsert the persisted session bytes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn save(&self, session_data: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_session (session_name, session_data, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (session_name)
             DO UPDATE SET session_data = EXCLUDED.session_data, updated_at = NOW()",
        )
        .bind(DEFAULT_SESSION)
        .bind(session_data)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }
}
