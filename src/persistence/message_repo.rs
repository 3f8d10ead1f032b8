//! Message repository for `PostgreSQL` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

use crate::models::message::MessageRecord;
use crate::Result;

use super::db::Database;

/// Source tag for every row this worker owns.
const SOURCE: &str = "telegram";

/// Repository wrapper around `PostgreSQL` for message records.
#[derive(Clone)]
pub struct MessageRepo {
    db: Arc<Database>,
}

impl MessageRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Idempotently insert a message keyed by
    /// `(source, conversation_id, external_message_id)`.
    ///
    /// Returns whether a row was actually inserted; a duplicate sighting
    /// returns `false` without touching the existing row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert_if_absent(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: &str,
        contact_id: Option<&str>,
        record: &MessageRecord,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO message (
                 id, conversation_id, contact_id, source, external_message_id,
                 direction, content_type, body, sent_at, status,
                 has_attachments, metadata, created_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
             ON CONFLICT (source, conversation_id, external_message_id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(conversation_id)
        .bind(contact_id)
        .bind(SOURCE)
        .bind(&record.external_message_id)
        .bind(record.direction.as_str())
        .bind(record.content_type.as_str())
        .bind(&record.body)
        .bind(record.sent_at)
        .bind(record.status)
        .bind(record.has_attachments)
        .bind(&record.metadata)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite only body and metadata of an existing message.
    ///
    /// This is the edit path: every other column, and the conversation's
    /// unread accounting, stays untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_body_and_metadata(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: &str,
        external_message_id: &str,
        body: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE message SET body = $4, metadata = $5
             WHERE source = $1 AND conversation_id = $2 AND external_message_id = $3",
        )
        .bind(SOURCE)
        .bind(conversation_id)
        .bind(external_message_id)
        .bind(body)
        .bind(metadata)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Count stored messages for a conversation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_for_conversation(&self, conversation_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM message WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_one(self.db.as_ref())
            .await?;

        Ok(row.get("cnt"))
    }

    /// Fetch body and sent timestamp by natural key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_body(
        &self,
        conversation_id: &str,
        external_message_id: &str,
    ) -> Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT body, sent_at FROM message
             WHERE source = $1 AND conversation_id = $2 AND external_message_id = $3",
        )
        .bind(SOURCE)
        .bind(conversation_id)
        .bind(external_message_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        Ok(row.map(|r| (r.get("body"), r.get("sent_at"))))
    }
}
