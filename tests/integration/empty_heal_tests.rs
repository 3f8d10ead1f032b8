use tokio_util::sync::CancellationToken;

use telegram_syncd::models::conversation::{conversation_id, ChatKind};

use super::test_helpers::{connect, inbound, spawn_pipeline, unique_chat_id, wait_until, ScriptedApi};

/// A conversation discovery created but never seeded gets its history
/// backfilled by the startup heal, with checkpoint and unread accounting.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn empty_conversation_is_healed_at_startup() {
    let db = connect().await;
    let chat_id = unique_chat_id();

    let api = ScriptedApi::new().with_history(
        chat_id,
        vec![
            inbound(chat_id, 10),
            inbound(chat_id, 11),
            inbound(chat_id, 12),
        ],
    );
    let pipeline = spawn_pipeline(db, api).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Never Seeded", ChatKind::Private)
        .await
        .expect("create conversation");

    pipeline
        .discovery
        .sync_empty_conversations(&CancellationToken::new())
        .await;

    let conv_id = conversation.id.clone();
    let messages = pipeline.messages.clone();
    assert!(
        wait_until(|| {
            let messages = messages.clone();
            let conv_id = conv_id.clone();
            async move { messages.count_for_conversation(&conv_id).await.unwrap_or(0) == 3 }
        })
        .await,
        "all three upstream messages should be stored"
    );

    let stored = pipeline
        .conversations
        .get_by_id(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_synced_message_id.as_deref(), Some("12"));
    assert_eq!(stored.unread_count, 3);
    assert_eq!(stored.last_message_at, Some(inbound(chat_id, 12).sent_at));

    pipeline.shutdown().await;
}

/// A conversation that already has messages is left alone by the heal.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn seeded_conversations_are_not_rescanned() {
    let db = connect().await;
    let chat_id = unique_chat_id();

    let api = ScriptedApi::new().with_history(chat_id, vec![inbound(chat_id, 1)]);
    let pipeline = spawn_pipeline(db, api).await;

    let conversation = pipeline
        .conversations
        .create(&conversation_id(chat_id), &chat_id.to_string(), "Warm", ChatKind::Private)
        .await
        .expect("create conversation");

    // First heal seeds the one message.
    pipeline
        .discovery
        .sync_empty_conversations(&CancellationToken::new())
        .await;

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

    // The conversation no longer matches the empty scan.
    let empties = pipeline
        .conversations
        .empty_conversations(100)
        .await
        .expect("scan");
    assert!(
        empties.iter().all(|c| c.conversation_id != conversation.id),
        "seeded conversation must not appear in the empty scan"
    );

    pipeline.shutdown().await;
}
