use std::sync::Arc;

use telegram_syncd::models::conversation::{conversation_id, ChatKind};
use telegram_syncd::sync::router::SourceTag;

use super::test_helpers::{connect, inbound, spawn_pipeline, unique_chat_id, wait_until, ScriptedApi};

/// Duplicate sightings across producers insert exactly one row and bump
/// `unread_count` exactly once.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn duplicate_enqueue_across_sources_inserts_once() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(db, ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Dup Chat", ChatKind::Private)
        .await
        .expect("create conversation");

    let message = inbound(chat_id, 100);
    assert!(pipeline.router.enqueue(message.clone(), SourceTag::Event).await);
    // The poll producer sees the same message before the event lands.
    pipeline.router.enqueue(message, SourceTag::Poll).await;

    let conv_id = conversation.id.clone();
    let messages = pipeline.messages.clone();
    assert!(
        wait_until(|| {
            let messages = messages.clone();
            let conv_id = conv_id.clone();
            async move { messages.count_for_conversation(&conv_id).await.unwrap_or(0) == 1 }
        })
        .await,
        "message should be stored exactly once"
    );

    // Give any duplicate a chance to land, then re-assert.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(
        pipeline.messages.count_for_conversation(&conversation.id).await.unwrap(),
        1
    );

    let stored = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.unread_count, 1);
    assert_eq!(stored.last_synced_message_id.as_deref(), Some("100"));
    assert!(stored.last_synced_at.is_some());
    assert!(stored.last_message_at.is_some());

    pipeline.shutdown().await;
}

/// An edit after insert rewrites the body without touching unread
/// accounting or the checkpoint.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn edit_after_insert_updates_body_only() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(db, ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Edit Chat", ChatKind::Private)
        .await
        .expect("create conversation");

    let mut message = inbound(chat_id, 77);
    message.text = "a".into();
    pipeline.router.enqueue(message.clone(), SourceTag::Event).await;

    let conv_id = conversation.id.clone();
    let messages = pipeline.messages.clone();
    assert!(
        wait_until(|| {
            let messages = messages.clone();
            let conv_id = conv_id.clone();
            async move { messages.count_for_conversation(&conv_id).await.unwrap_or(0) == 1 }
        })
        .await
    );

    let before = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();

    message.text = "b".into();
    pipeline.router.enqueue(message, SourceTag::EventEdit).await;

    let messages = pipeline.messages.clone();
    let conv_id = conversation.id.clone();
    assert!(
        wait_until(|| {
            let messages = messages.clone();
            let conv_id = conv_id.clone();
            async move {
                messages
                    .get_body(&conv_id, "77")
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|(body, _)| body == "b")
            }
        })
        .await,
        "edit should rewrite the body"
    );

    let after = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.unread_count, before.unread_count);
    assert_eq!(after.last_synced_message_id, before.last_synced_message_id);

    pipeline.shutdown().await;
}

/// Out-of-order ingestion never regresses the checkpoint or the activity
/// timestamp.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn checkpoint_and_activity_are_monotonic() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(db, ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Ordered", ChatKind::Group)
        .await
        .expect("create conversation");

    pipeline.router.enqueue(inbound(chat_id, 20), SourceTag::Event).await;
    pipeline.router.enqueue(inbound(chat_id, 10), SourceTag::Catchup).await;

    let conv_id = conversation.id.clone();
    let messages = pipeline.messages.clone();
    assert!(
        wait_until(|| {
            let messages = messages.clone();
            let conv_id = conv_id.clone();
            async move { messages.count_for_conversation(&conv_id).await.unwrap_or(0) == 2 }
        })
        .await
    );

    let stored = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_synced_message_id.as_deref(), Some("20"));
    assert_eq!(stored.last_message_at, Some(inbound(chat_id, 20).sent_at));
    assert_eq!(stored.unread_count, 2);

    pipeline.shutdown().await;
}

/// Outbound messages are stored without incrementing `unread_count`.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn outbound_message_does_not_increment_unread() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(db, ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Own Sends", ChatKind::Private)
        .await
        .expect("create conversation");

    let mut message = inbound(chat_id, 5);
    message.outgoing = true;
    pipeline.router.enqueue(message, SourceTag::Event).await;

    let conv_id = conversation.id.clone();
    let messages = pipeline.messages.clone();
    assert!(
        wait_until(|| {
            let messages = messages.clone();
            let conv_id = conv_id.clone();
            async move { messages.count_for_conversation(&conv_id).await.unwrap_or(0) == 1 }
        })
        .await
    );

    let stored = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.unread_count, 0);

    pipeline.shutdown().await;
}

/// A message from an unknown chat auto-creates the conversation from the
/// upstream profile, plus a contact for private chats.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn unknown_chat_is_auto_created() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let api = ScriptedApi::new().with_profile(chat_id, "Fresh Contact", ChatKind::Private);
    let pipeline = spawn_pipeline(db, api).await;

    pipeline.router.enqueue(inbound(chat_id, 1), SourceTag::Event).await;

    let conversations = pipeline.conversations.clone();
    let external = chat_id.to_string();
    assert!(
        wait_until(|| {
            let conversations = conversations.clone();
            let external = external.clone();
            async move {
                conversations
                    .find_by_external(&external)
                    .await
                    .ok()
                    .flatten()
                    .is_some()
            }
        })
        .await,
        "conversation should be auto-created"
    );

    let created = pipeline
        .conversations
        .find_by_external(&chat_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.title, "Fresh Contact");
    assert_eq!(created.kind, ChatKind::Private);

    let contact = pipeline
        .contacts
        .find_by_identity(&chat_id.to_string())
        .await
        .unwrap();
    assert!(contact.is_some(), "private chat discovery creates a contact");

    pipeline.shutdown().await;
}

/// Messages for a sync-disabled conversation are dropped.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn sync_disabled_conversation_drops_messages() {
    let db = connect().await;
    let chat_id = unique_chat_id();
    let pipeline = spawn_pipeline(Arc::clone(&db), ScriptedApi::new()).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Muted", ChatKind::Private)
        .await
        .expect("create conversation");
    sqlx::query("UPDATE conversation SET sync_disabled = TRUE WHERE id = $1")
        .bind(&conversation.id)
        .execute(db.as_ref())
        .await
        .expect("disable sync");

    pipeline.router.enqueue(inbound(chat_id, 9), SourceTag::Event).await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    assert_eq!(
        pipeline.messages.count_for_conversation(&conversation.id).await.unwrap(),
        0
    );

    pipeline.shutdown().await;
}
