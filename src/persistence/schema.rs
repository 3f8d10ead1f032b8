//! `PostgreSQL` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every worker startup. Produces a convergent result.

use sqlx::PgPool;

use crate::Result;

/// Apply all table definitions to the connected store.
///
/// Creates every table and index idempotently. Safe to call on every
/// startup; an externally managed schema with the same shape is left
/// untouched.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
#[allow(clippy::too_many_lines)] // One DDL block per table, applied in order.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS conversation (
    id                      TEXT PRIMARY KEY NOT NULL,
    source                  TEXT NOT NULL DEFAULT 'telegram',
    external_chat_id        TEXT NOT NULL,
    title                   TEXT NOT NULL,
    kind                    TEXT NOT NULL CHECK(kind IN ('private','group','supergroup','channel')),
    sync_disabled           BOOLEAN NOT NULL DEFAULT FALSE,
    last_synced_message_id  TEXT,
    last_synced_at          TIMESTAMPTZ,
    last_message_at         TIMESTAMPTZ,
    unread_count            INTEGER NOT NULL DEFAULT 0 CHECK(unread_count >= 0),
    last_read_message_id    TEXT,
    last_read_at            TIMESTAMPTZ,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(source, external_chat_id)
);

CREATE TABLE IF NOT EXISTS message (
    id                      TEXT PRIMARY KEY NOT NULL,
    conversation_id         TEXT NOT NULL REFERENCES conversation(id),
    contact_id              TEXT,
    source                  TEXT NOT NULL DEFAULT 'telegram',
    external_message_id     TEXT NOT NULL,
    direction               TEXT NOT NULL CHECK(direction IN ('inbound','outbound')),
    content_type            TEXT NOT NULL CHECK(content_type IN ('text','media')),
    body                    TEXT NOT NULL DEFAULT '',
    sent_at                 TIMESTAMPTZ NOT NULL,
    status                  TEXT NOT NULL,
    has_attachments         BOOLEAN NOT NULL DEFAULT FALSE,
    metadata                JSONB,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(source, conversation_id, external_message_id)
);

CREATE TABLE IF NOT EXISTS contact (
    id                      TEXT PRIMARY KEY NOT NULL,
    display_name            TEXT,
    is_online               BOOLEAN NOT NULL DEFAULT FALSE,
    online_status           TEXT NOT NULL DEFAULT 'unknown',
    last_seen_at            TIMESTAMPTZ,
    last_status_check       TIMESTAMPTZ,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS source_identity (
    id                      TEXT PRIMARY KEY NOT NULL,
    contact_id              TEXT NOT NULL REFERENCES contact(id),
    source                  TEXT NOT NULL DEFAULT 'telegram',
    external_id             TEXT NOT NULL,
    username                TEXT,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(source, external_id)
);

CREATE TABLE IF NOT EXISTS sync_lock (
    id                      TEXT PRIMARY KEY NOT NULL,
    lock_type               TEXT NOT NULL,
    lock_key                TEXT NOT NULL,
    process_id              TEXT NOT NULL,
    hostname                TEXT NOT NULL,
    acquired_at             TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    heartbeat_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires_at              TIMESTAMPTZ NOT NULL,
    metadata                JSONB,
    UNIQUE(lock_type, lock_key)
);

CREATE TABLE IF NOT EXISTS listener_state (
    id                      TEXT PRIMARY KEY NOT NULL,
    status                  TEXT NOT NULL,
    started_at              TIMESTAMPTZ,
    last_heartbeat          TIMESTAMPTZ,
    last_message_at         TIMESTAMPTZ,
    messages_received       BIGINT NOT NULL DEFAULT 0,
    errors                  JSONB,
    process_id              TEXT,
    hostname                TEXT,
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS outgoing_message (
    id                      TEXT PRIMARY KEY NOT NULL,
    conversation_id         TEXT NOT NULL REFERENCES conversation(id),
    text                    TEXT,
    reply_to_message_id     TEXT,
    attachment_kind         TEXT,
    attachment_key          TEXT,
    attachment_name         TEXT,
    attachment_mime         TEXT,
    attachment_caption      TEXT,
    status                  TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','sending','sent','failed')),
    scheduled_for           TIMESTAMPTZ,
    locked_by               TEXT,
    locked_at               TIMESTAMPTZ,
    retry_count             INTEGER NOT NULL DEFAULT 0,
    max_retries             INTEGER NOT NULL DEFAULT 3,
    error_message           TEXT,
    sent_message_id         TEXT,
    sent_at                 TIMESTAMPTZ,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS worker_session (
    session_name            TEXT PRIMARY KEY NOT NULL,
    session_data            BYTEA NOT NULL,
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS file_upload (
    id                      TEXT PRIMARY KEY NOT NULL,
    storage_key             TEXT NOT NULL UNIQUE,
    file_name               TEXT,
    mime_type               TEXT,
    metadata                JSONB,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_message_conversation ON message(conversation_id);
CREATE INDEX IF NOT EXISTS idx_message_sent_at ON message(conversation_id, sent_at);
CREATE INDEX IF NOT EXISTS idx_conversation_last_message ON conversation(last_message_at DESC NULLS LAST);
CREATE INDEX IF NOT EXISTS idx_conversation_last_synced ON conversation(last_synced_at ASC NULLS FIRST);
CREATE INDEX IF NOT EXISTS idx_outgoing_claim ON outgoing_message(status, scheduled_for, created_at);
CREATE INDEX IF NOT EXISTS idx_identity_contact ON source_identity(contact_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
