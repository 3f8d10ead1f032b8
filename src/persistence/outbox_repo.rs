//! Outbox repository — atomic claim and result recording for queued sends.

use std::sync::Arc;

use sqlx::Row;

use crate::models::outbox::ClaimedOutboxMessage;
use crate::Result;

use super::db::Database;

/// Stale claims older than this are eligible for takeover.
const LOCK_TIMEOUT_SECONDS: f64 = 60.0;

/// Errors persisted on an outbox row are truncated to this length.
const ERROR_TRUNCATE: usize = 500;

/// Repository wrapper around `PostgreSQL` for the outgoing-message queue.
#[derive(Clone)]
pub struct OutboxRepo {
    db: Arc<Database>,
}

impl OutboxRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Atomically claim the oldest sendable row for this process.
    ///
    /// One statement: pick the oldest `pending` row that is due
    /// (`scheduled_for` absent or past) and not freshly locked, skipping
    /// rows another sender holds a row lock on, and flip it to `sending`
    /// under our claim. Concurrent senders can never claim the same row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the claim statement fails.
    pub async fn claim_next(&self, process_id: &str) -> Result<Option<ClaimedOutboxMessage>> {
        let row = sqlx::query(
            "UPDATE outgoing_message SET
                 status = 'sending',
                 locked_by = $1,
                 locked_at = NOW(),
                 updated_at = NOW()
             WHERE id = (
                 SELECT id FROM outgoing_message
                 WHERE status = 'pending'
                   AND (scheduled_for IS NULL OR scheduled_for <= NOW())
                   AND (locked_by IS NULL
                        OR locked_at < NOW() - make_interval(secs => $2))
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, conversation_id, text, reply_to_message_id,
                       attachment_kind, attachment_key, attachment_name,
                       attachment_mime, attachment_caption,
                       retry_count, max_retries",
        )
        .bind(process_id)
        .bind(LOCK_TIMEOUT_SECONDS)
        .fetch_optional(self.db.as_ref())
        .await?;

        Ok(row.map(|r| ClaimedOutboxMessage {
            id: r.get("id"),
            conversation_id: r.get("conversation_id"),
            text: r.get("text"),
            reply_to_message_id: r.get("reply_to_message_id"),
            attachment_kind: r.get("attachment_kind"),
            attachment_key: r.get("attachment_key"),
            attachment_name: r.get("attachment_name"),
            attachment_mime: r.get("attachment_mime"),
            attachment_caption: r.get("attachment_caption"),
            retry_count: r.get("retry_count"),
            max_retries: r.get("max_retries"),
        }))
    }

    /// Record a successful send and release the claim.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_sent(&self, id: &str, sent_message_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outgoing_message SET
                 status = 'sent',
                 sent_message_id = $2,
                 sent_at = NOW(),
                 locked_by = NULL,
                 locked_at = NULL,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(sent_message_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record a failed attempt: back to `pending` while retries remain,
    /// terminally `failed` once the budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_failed(
        &self,
        id: &str,
        retry_count: i32,
        max_retries: i32,
        error: &str,
    ) -> Result<()> {
        let new_retry = retry_count + 1;
        let status = if new_retry >= max_retries {
            "failed"
        } else {
            "pending"
        };
        let truncated: String = error.chars().take(ERROR_TRUNCATE).collect();

        sqlx::query(
            "UPDATE outgoing_message SET
                 status = $2,
                 error_message = $3,
                 retry_count = $4,
                 locked_by = NULL,
                 locked_at = NULL,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(&truncated)
        .bind(new_retry)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Fetch the base64 payload and metadata of a stored attachment.
    ///
    /// Returns `(bytes, file_name, mime_type)` when the storage key
    /// resolves and carries an inline payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn fetch_attachment(
        &self,
        storage_key: &str,
    ) -> Result<Option<(Vec<u8>, Option<String>, Option<String>)>> {
        use base64::Engine as _;

        let row = sqlx::query(
            "SELECT metadata, file_name, mime_type FROM file_upload WHERE storage_key = $1",
        )
        .bind(storage_key)
        .fetch_optional(self.db.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata: Option<serde_json::Value> = row.get("metadata");
        let encoded = metadata
            .as_ref()
            .and_then(|m| m.get("base64_content"))
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        let Some(encoded) = encoded else {
            return Ok(None);
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| crate::AppError::Outbox(format!("attachment decode: {err}")))?;

        Ok(Some((bytes, row.get("file_name"), row.get("mime_type"))))
    }
}
