//! Listener-state repository — the singleton liveness row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::listener_state::{ErrorEntry, ListenerState, ListenerStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Fixed key of the single state row.
const SINGLETON: &str = "singleton";

/// Repository over the `listener_state` table.
#[derive(Clone)]
pub struct StateRepo {
    db: Arc<Database>,
    process_id: String,
    hostname: String,
}

impl StateRepo {
    /// Create a new repository instance bound to this process's identity.
    #[must_use]
    pub fn new(db: Arc<Database>, process_id: String, hostname: String) -> Self {
        Self {
            db,
            process_id,
            hostname,
        }
    }

    /// Upsert the singleton state row.
    ///
    /// `started_at` is stamped only on the transition into `running`, so a
    /// heartbeat refresh never resets the uptime anchor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn update_state(
        &self,
        status: ListenerStatus,
        messages_received: i64,
        errors: &[ErrorEntry],
    ) -> Result<()> {
        let errors_json = serde_json::to_value(errors)?;

        sqlx::query(
            "INSERT INTO listener_state (
                 id, status, last_heartbeat, process_id, hostname,
                 started_at, messages_received, errors, updated_at
             )
             VALUES (
                 $1, $2, NOW(), $3, $4,
                 CASE WHEN $2 = 'running' THEN NOW() END,
                 $5, $6, NOW()
             )
             ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status,
                 last_heartbeat = EXCLUDED.last_heartbeat,
                 process_id = EXCLUDED.process_id,
                 hostname = EXCLUDED.hostname,
                 started_at = CASE
                     WHEN EXCLUDED.status = 'running' AND listener_state.status != 'running'
                     THEN NOW()
                     ELSE listener_state.started_at
                 END,
                 messages_received = EXCLUDED.messages_received,
                 errors = EXCLUDED.errors,
                 updated_at = NOW()",
        )
        .bind(SINGLETON)
        .bind(status.as_str())
        .bind(&self.process_id)
        .bind(&self.hostname)
        .bind(messages_received)
        .bind(errors_json)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Bump the lifetime message counter and refresh the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn increment_messages(&self, count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE listener_state SET
                 messages_received = messages_received + $2,
                 last_message_at = NOW(),
                 last_heartbeat = NOW(),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(SINGLETON)
        .bind(count)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Read the current state snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the row is malformed.
    pub async fn get_state(&self) -> Result<Option<ListenerState>> {
        let row = sqlx::query(
            "SELECT status, started_at, last_heartbeat, messages_received,
                    errors, process_id, hostname
             FROM listener_state WHERE id = $1",
        )
        .bind(SINGLETON)
        .fetch_optional(self.db.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_raw: String = row.get("status");
        let status = ListenerStatus::parse(&status_raw)
            .ok_or_else(|| AppError::Db(format!("invalid listener status: {status_raw}")))?;
        let errors_raw: Option<serde_json::Value> = row.get("errors");
        let errors: Vec<ErrorEntry> = errors_raw
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let started_at: Option<DateTime<Utc>> = row.get("started_at");

        Ok(Some(ListenerState {
            status,
            started_at,
            last_heartbeat: row.get("last_heartbeat"),
            messages_received: row.get("messages_received"),
            errors,
            process_id: row.get("process_id"),
            hostname: row.get("hostname"),
        }))
    }
}
