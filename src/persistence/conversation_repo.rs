//! Conversation repository for `PostgreSQL` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

use crate::models::conversation::{CachedConversation, ChatKind, Conversation};
use crate::{AppError, Result};

use super::db::Database;

/// Source tag for every row this worker owns.
const SOURCE: &str = "telegram";

/// Cursor over a conversation's sync state, as read by the catch-up loops.
#[derive(Debug, Clone)]
pub struct SyncCursor {
    /// Conversation record id.
    pub conversation_id: String,
    /// Marked Telegram chat id, stringified.
    pub external_chat_id: String,
    /// Display title, for log lines.
    pub title: String,
    /// Checkpoint at the time of the read.
    pub last_synced_message_id: Option<String>,
}

impl SyncCursor {
    /// Checkpoint parsed as the `min_id` floor for an upstream fetch.
    ///
    /// An absent or malformed checkpoint yields 0, i.e. no floor.
    #[must_use]
    pub fn min_id(&self) -> i64 {
        self.last_synced_message_id
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// Internal row struct for cache-shaped reads.
#[derive(sqlx::FromRow)]
struct CachedRow {
    id: String,
    title: String,
    kind: String,
    sync_disabled: bool,
}

impl CachedRow {
    fn into_cached(self) -> Result<CachedConversation> {
        let kind = ChatKind::parse(&self.kind)
            .ok_or_else(|| AppError::Db(format!("invalid conversation kind: {}", self.kind)))?;
        Ok(CachedConversation {
            id: self.id,
            title: self.title,
            kind,
            sync_disabled: self.sync_disabled,
        })
    }
}

/// Internal row struct for full-entity reads.
#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    source: String,
    external_chat_id: String,
    title: String,
    kind: String,
    sync_disabled: bool,
    last_synced_message_id: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
    last_message_at: Option<DateTime<Utc>>,
    unread_count: i32,
    last_read_message_id: Option<String>,
    last_read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_conversation(self) -> Result<Conversation> {
        let kind = ChatKind::parse(&self.kind)
            .ok_or_else(|| AppError::Db(format!("invalid conversation kind: {}", self.kind)))?;
        Ok(Conversation {
            id: self.id,
            source: self.source,
            external_chat_id: self.external_chat_id,
            title: self.title,
            kind,
            sync_disabled: self.sync_disabled,
            last_synced_message_id: self.last_synced_message_id,
            last_synced_at: self.last_synced_at,
            last_message_at: self.last_message_at,
            unread_count: self.unread_count,
            last_read_message_id: self.last_read_message_id,
            last_read_at: self.last_read_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository wrapper around `PostgreSQL` for conversation records.
#[derive(Clone)]
pub struct ConversationRepo {
    db: Arc<Database>,
}

impl ConversationRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up a conversation by its marked Telegram chat id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_by_external(&self, external_chat_id: &str) -> Result<Option<CachedConversation>> {
        let row: Option<CachedRow> = sqlx::query_as(
            "SELECT id, title, kind, sync_disabled FROM conversation
             WHERE external_chat_id = $1 AND source = $2",
        )
        .bind(external_chat_id)
        .bind(SOURCE)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(CachedRow::into_cached).transpose()
    }

    /// Retrieve a full conversation entity by record id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> =
            sqlx::query_as("SELECT * FROM conversation WHERE id = $1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(ConversationRow::into_conversation).transpose()
    }

    /// Create a conversation for a newly seen chat.
    ///
    /// A concurrent creator colliding on `(source, external_chat_id)` only
    /// refreshes the title, so whichever writer wins the row is authoritative
    /// and both observe the same record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn create(
        &self,
        id: &str,
        external_chat_id: &str,
        title: &str,
        kind: ChatKind,
    ) -> Result<CachedConversation> {
        let row: CachedRow = sqlx::query_as(
            "INSERT INTO conversation (id, source, external_chat_id, title, kind, sync_disabled)
             VALUES ($1, $2, $3, $4, $5, FALSE)
             ON CONFLICT (source, external_chat_id)
             DO UPDATE SET title = EXCLUDED.title, updated_at = NOW()
             RETURNING id, title, kind, sync_disabled",
        )
        .bind(id)
        .bind(SOURCE)
        .bind(external_chat_id)
        .bind(title)
        .bind(kind.as_str())
        .fetch_one(self.db.as_ref())
        .await?;

        row.into_cached()
    }

    /// Advance the conversation row after a successful message insert.
    ///
    /// One statement: `last_message_at` and the checkpoint both move through
    /// `GREATEST` so out-of-order ingestion can never regress them, and
    /// `unread_count` grows by `unread_increment` (1 for inbound, 0 otherwise).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn advance_after_insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: &str,
        sent_at: DateTime<Utc>,
        external_message_id: i64,
        unread_increment: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversation SET
                 last_message_at = GREATEST(last_message_at, $2),
                 last_synced_message_id =
                     (GREATEST(COALESCE(last_synced_message_id, '0')::bigint, $3))::text,
                 last_synced_at = NOW(),
                 unread_count = unread_count + $4,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(sent_at)
        .bind(external_message_id)
        .bind(unread_increment)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Apply an outbox read-ack: the account owner read up to `max_id`.
    ///
    /// Gated so a stale ack never regresses `last_read_message_id`.
    /// Returns whether a row was actually updated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn apply_read_ack(&self, conversation_id: &str, max_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversation SET
                 unread_count = 0,
                 last_read_message_id = $2::text,
                 last_read_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1
               AND (unread_count > 0
                    OR last_read_message_id IS NULL
                    OR last_read_message_id::bigint < $2)",
        )
        .bind(conversation_id)
        .bind(max_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a dialog unread-mark toggle.
    ///
    /// Marking unread floors `unread_count` at 1 and clears `last_read_at`;
    /// marking read zeroes the count and stamps `last_read_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn apply_unread_mark(&self, conversation_id: &str, unread: bool) -> Result<()> {
        let sql = if unread {
            "UPDATE conversation SET
                 unread_count = GREATEST(unread_count, 1),
                 last_read_at = NULL,
                 updated_at = NOW()
             WHERE id = $1"
        } else {
            "UPDATE conversation SET
                 unread_count = 0,
                 last_read_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1"
        };

        sqlx::query(sql)
            .bind(conversation_id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// Reconcile unread state against an upstream dialog snapshot.
    ///
    /// Writes only when a value actually differs, so routine discovery
    /// passes over an unchanged dialog cost one read and zero writes.
    /// Returns whether a row was updated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn reconcile_dialog_state(
        &self,
        conversation_id: &str,
        unread_count: i32,
        read_inbox_max_id: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversation SET
                 unread_count = $2,
                 last_read_message_id = COALESCE($3::text, last_read_message_id),
                 updated_at = NOW()
             WHERE id = $1
               AND (unread_count != $2
                    OR last_read_message_id IS DISTINCT FROM $3::text)",
        )
        .bind(conversation_id)
        .bind(unread_count)
        .bind(read_inbox_max_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recently active syncable conversations, for the active poll.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn most_active(&self, limit: i64) -> Result<Vec<SyncCursor>> {
        self.cursors(
            "SELECT id, external_chat_id, title, last_synced_message_id
             FROM conversation
             WHERE source = $1 AND sync_disabled = FALSE
               AND kind IN ('private','group','supergroup')
             ORDER BY last_message_at DESC NULLS LAST
             LIMIT $2",
            limit,
        )
        .await
    }

    /// Stalest-first syncable conversations, for the full catch-up.
    ///
    /// `NULLS FIRST` puts never-synced conversations at the front of the
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn stalest(&self, limit: i64) -> Result<Vec<SyncCursor>> {
        self.cursors(
            "SELECT id, external_chat_id, title, last_synced_message_id
             FROM conversation
             WHERE source = $1 AND sync_disabled = FALSE
               AND kind IN ('private','group','supergroup')
             ORDER BY last_synced_at ASC NULLS FIRST
             LIMIT $2",
            limit,
        )
        .await
    }

    /// Syncable conversations that have no messages at all.
    ///
    /// These are rows discovery created but never managed to seed; the
    /// startup heal re-seeds them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn empty_conversations(&self, limit: i64) -> Result<Vec<SyncCursor>> {
        self.cursors(
            "SELECT c.id, c.external_chat_id, c.title, c.last_synced_message_id
             FROM conversation c
             LEFT JOIN message m ON m.conversation_id = c.id
             WHERE c.source = $1 AND c.sync_disabled = FALSE
               AND c.kind IN ('private','group','supergroup')
             GROUP BY c.id, c.external_chat_id, c.title, c.last_synced_message_id, c.created_at
             HAVING COUNT(m.id) = 0
             ORDER BY c.created_at DESC
             LIMIT $2",
            limit,
        )
        .await
    }

    /// Resolve the external chat id and title for an outbox send.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn send_target(&self, conversation_id: &str) -> Result<Option<(String, String)>> {
        let row = sqlx::query("SELECT external_chat_id, title FROM conversation WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(self.db.as_ref())
            .await?;

        Ok(row.map(|r| (r.get("external_chat_id"), r.get("title"))))
    }

    async fn cursors(&self, sql: &str, limit: i64) -> Result<Vec<SyncCursor>> {
        let rows = sqlx::query(sql)
            .bind(SOURCE)
            .bind(limit)
            .fetch_all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| SyncCursor {
                conversation_id: r.get(0),
                external_chat_id: r.get(1),
                title: r.get(2),
                last_synced_message_id: r.get(3),
            })
            .collect())
    }
}
