use std::sync::Arc;

use telegram_syncd::models::contact::PresenceStatus;
use telegram_syncd::models::conversation::{conversation_id, ChatKind};
use telegram_syncd::telegram::api::PresenceUpdate;

use super::test_helpers::{connect, spawn_pipeline, unique_chat_id, ScriptedApi};

/// A read-ack with a newer max id collapses the unread count and advances
/// the read pointer.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn read_ack_collapses_unread() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(Arc::clone(&db), ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Read Me", ChatKind::Private)
        .await
        .expect("create conversation");
    sqlx::query(
        "UPDATE conversation SET unread_count = 5, last_read_message_id = '100' WHERE id = $1",
    )
    .bind(&conversation.id)
    .execute(db.as_ref())
    .await
    .expect("seed unread state");

    pipeline
        .processor
        .handle_read_ack(chat_id, 120)
        .await
        .expect("read ack");

    let stored = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.unread_count, 0);
    assert_eq!(stored.last_read_message_id.as_deref(), Some("120"));
    assert!(stored.last_read_at.is_some());

    pipeline.shutdown().await;
}

/// A stale read-ack never regresses the read pointer.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn stale_read_ack_is_ignored() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(Arc::clone(&db), ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Old Ack", ChatKind::Private)
        .await
        .expect("create conversation");
    sqlx::query(
        "UPDATE conversation SET unread_count = 0, last_read_message_id = '200' WHERE id = $1",
    )
    .bind(&conversation.id)
    .execute(db.as_ref())
    .await
    .expect("seed read state");

    pipeline
        .processor
        .handle_read_ack(chat_id, 120)
        .await
        .expect("read ack");

    let stored = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_read_message_id.as_deref(), Some("200"));

    pipeline.shutdown().await;
}

/// The unread-mark toggle floors the count at 1 when set and zeroes it
/// when cleared.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn unread_mark_toggles_unread_state() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(db, ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Marked", ChatKind::Private)
        .await
        .expect("create conversation");

    pipeline
        .processor
        .handle_unread_mark(chat_id, true)
        .await
        .expect("mark unread");

    let marked = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marked.unread_count, 1);
    assert!(marked.last_read_at.is_none());

    pipeline
        .processor
        .handle_unread_mark(chat_id, false)
        .await
        .expect("mark read");

    let cleared = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cleared.unread_count, 0);
    assert!(cleared.last_read_at.is_some());

    pipeline.shutdown().await;
}

/// Marking unread preserves a larger existing unread count.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn unread_mark_preserves_larger_counts() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(Arc::clone(&db), ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Busy", ChatKind::Private)
        .await
        .expect("create conversation");
    sqlx::query("UPDATE conversation SET unread_count = 7 WHERE id = $1")
        .bind(&conversation.id)
        .execute(db.as_ref())
        .await
        .expect("seed unread");

    pipeline
        .processor
        .handle_unread_mark(chat_id, true)
        .await
        .expect("mark unread");

    let stored = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.unread_count, 7);

    pipeline.shutdown().await;
}

/// Presence updates land on the contact behind the identity.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn presence_updates_contact_fields() {
    let db = connect().await;
    let user_id = unique_chat_id();
    let pipeline = spawn_pipeline(Arc::clone(&db), ScriptedApi::new()).await;

    pipeline
        .contacts
        .ensure_contact(&user_id.to_string(), "Flaky Friend", None)
        .await
        .expect("create contact");

    pipeline
        .processor
        .handle_presence(
            user_id,
            PresenceUpdate {
                status: PresenceStatus::Online,
                last_seen_at: None,
            },
        )
        .await
        .expect("presence online");

    let row = sqlx::query_as::<_, (bool, String)>(
        "SELECT c.is_online, c.online_status FROM contact c
         JOIN source_identity si ON si.contact_id = c.id
         WHERE si.source = 'telegram' AND si.external_id = $1",
    )
    .bind(user_id.to_string())
    .fetch_one(db.as_ref())
    .await
    .expect("contact row");
    assert!(row.0);
    assert_eq!(row.1, "online");

    let seen = chrono::Utc::now() - chrono::Duration::minutes(3);
    pipeline
        .processor
        .handle_presence(
            user_id,
            PresenceUpdate {
                status: PresenceStatus::Offline,
                last_seen_at: Some(seen),
            },
        )
        .await
        .expect("presence offline");

    let row = sqlx::query_as::<_, (bool, String, Option<chrono::DateTime<chrono::Utc>>)>(
        "SELECT c.is_online, c.online_status, c.last_seen_at FROM contact c
         JOIN source_identity si ON si.contact_id = c.id
         WHERE si.source = 'telegram' AND si.external_id = $1",
    )
    .bind(user_id.to_string())
    .fetch_one(db.as_ref())
    .await
    .expect("contact row");
    assert!(!row.0);
    assert_eq!(row.1, "offline");
    assert!(row.2.is_some());

    pipeline.shutdown().await;
}
