use std::sync::Arc;

use serial_test::serial;
use telegram_syncd::models::conversation::{conversation_id, ChatKind};
use telegram_syncd::persistence::conversation_repo::ConversationRepo;
use telegram_syncd::persistence::db::Database;
use telegram_syncd::persistence::outbox_repo::OutboxRepo;

use super::test_helpers::{connect, unique_chat_id, unique_key};

/// The claim statement picks the oldest pending row table-wide, so these
/// tests run serially against an empty queue.
async fn purge_outbox(db: &Arc<Database>) {
    sqlx::query("DELETE FROM outgoing_message")
        .execute(db.as_ref())
        .await
        .expect("purge outbox");
}

async fn seed_conversation(db: &Arc<Database>) -> String {
    let chat_id = unique_chat_id();
    let repo = ConversationRepo::new(Arc::clone(db));
    repo.create(&conversation_id(chat_id), &chat_id.to_string(), "Outbox Target", ChatKind::Private)
        .await
        .expect("create conversation")
        .id
}

async fn seed_outbox_row(db: &Arc<Database>, conversation_id: &str, max_retries: i32) -> String {
    let id = unique_key("out");
    sqlx::query(
        "INSERT INTO outgoing_message (id, conversation_id, text, max_retries)
         VALUES ($1, $2, 'queued hello', $3)",
    )
    .bind(&id)
    .bind(conversation_id)
    .bind(max_retries)
    .execute(db.as_ref())
    .await
    .expect("seed outbox row");
    id
}

async fn row_state(db: &Arc<Database>, id: &str) -> (String, i32, Option<String>, Option<String>) {
    sqlx::query_as(
        "SELECT status, retry_count, sent_message_id, locked_by
         FROM outgoing_message WHERE id = $1",
    )
    .bind(id)
    .fetch_one(db.as_ref())
    .await
    .expect("outbox row")
}

/// Claiming flips the row to `sending` under this process's lock; a second
/// claim finds nothing.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn claim_is_exclusive() {
    let db = connect().await;
    purge_outbox(&db).await;
    let conversation = seed_conversation(&db).await;
    let row = seed_outbox_row(&db, &conversation, 3).await;
    let repo = OutboxRepo::new(Arc::clone(&db));

    let claimed = repo.claim_next("proc-a").await.unwrap();
    let claimed = claimed.expect("row claimed");
    assert_eq!(claimed.id, row);
    assert_eq!(claimed.text.as_deref(), Some("queued hello"));

    let (status, _, _, locked_by) = row_state(&db, &row).await;
    assert_eq!(status, "sending");
    assert_eq!(locked_by.as_deref(), Some("proc-a"));

    // The row is no longer pending, so a competing sender sees nothing.
    let competing = repo.claim_next("proc-b").await.unwrap();
    assert!(competing.is_none() || competing.is_some_and(|c| c.id != row));

    repo.mark_sent(&row, "424242").await.unwrap();
}

/// Success records the sent id and clears the claim.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn mark_sent_records_result() {
    let db = connect().await;
    purge_outbox(&db).await;
    let conversation = seed_conversation(&db).await;
    let row = seed_outbox_row(&db, &conversation, 3).await;
    let repo = OutboxRepo::new(Arc::clone(&db));

    repo.claim_next("proc-a").await.unwrap();
    repo.mark_sent(&row, "99001").await.unwrap();

    let (status, _, sent_message_id, locked_by) = row_state(&db, &row).await;
    assert_eq!(status, "sent");
    assert_eq!(sent_message_id.as_deref(), Some("99001"));
    assert!(locked_by.is_none());
}

/// Failures walk pending → sending → pending until the retry budget is
/// spent, then land on `failed` with no sent id.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn retries_exhaust_to_failed() {
    let db = connect().await;
    purge_outbox(&db).await;
    let conversation = seed_conversation(&db).await;
    let row = seed_outbox_row(&db, &conversation, 3).await;
    let repo = OutboxRepo::new(Arc::clone(&db));

    for expected_retry in 1..=2 {
        let claimed = repo.claim_next("proc-a").await.unwrap();
        assert!(claimed.is_some_and(|c| c.id == row), "retry {expected_retry} claim");
        repo.mark_failed(&row, expected_retry - 1, 3, "scripted send failure")
            .await
            .unwrap();

        let (status, retry_count, _, _) = row_state(&db, &row).await;
        assert_eq!(status, "pending", "retry {expected_retry} returns to pending");
        assert_eq!(retry_count, expected_retry);
    }

    let claimed = repo.claim_next("proc-a").await.unwrap();
    assert!(claimed.is_some_and(|c| c.id == row));
    repo.mark_failed(&row, 2, 3, "scripted send failure").await.unwrap();

    let (status, retry_count, sent_message_id, locked_by) = row_state(&db, &row).await;
    assert_eq!(status, "failed");
    assert_eq!(retry_count, 3);
    assert!(sent_message_id.is_none(), "failed rows never carry a sent id");
    assert!(locked_by.is_none());

    // Terminal rows are never re-claimed.
    let after = repo.claim_next("proc-a").await.unwrap();
    assert!(after.is_none() || after.is_some_and(|c| c.id != row));
}

/// Rows scheduled in the future are invisible to the claim.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn scheduled_rows_wait_their_turn() {
    let db = connect().await;
    purge_outbox(&db).await;
    let conversation = seed_conversation(&db).await;
    let row = unique_key("scheduled");
    sqlx::query(
        "INSERT INTO outgoing_message (id, conversation_id, text, scheduled_for)
         VALUES ($1, $2, 'later', NOW() + INTERVAL '1 hour')",
    )
    .bind(&row)
    .bind(&conversation)
    .execute(db.as_ref())
    .await
    .expect("seed scheduled row");

    let repo = OutboxRepo::new(Arc::clone(&db));
    let claimed = repo.claim_next("proc-a").await.unwrap();
    assert!(claimed.is_none() || claimed.is_some_and(|c| c.id != row));

    let (status, _, _, _) = row_state(&db, &row).await;
    assert_eq!(status, "pending");
}

/// A stale claim from a dead sender is taken over after the lock timeout.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn stale_claim_is_taken_over() {
    let db = connect().await;
    purge_outbox(&db).await;
    let conversation = seed_conversation(&db).await;
    let row = unique_key("stale");
    sqlx::query(
        "INSERT INTO outgoing_message (id, conversation_id, text, locked_by, locked_at)
         VALUES ($1, $2, 'stuck', 'dead-proc', NOW() - INTERVAL '2 minutes')",
    )
    .bind(&row)
    .bind(&conversation)
    .execute(db.as_ref())
    .await
    .expect("seed stale-locked row");

    let repo = OutboxRepo::new(Arc::clone(&db));
    let claimed = repo.claim_next("proc-b").await.unwrap();
    assert!(claimed.is_some_and(|c| c.id == row), "stale lock must be taken over");

    let (_, _, _, locked_by) = row_state(&db, &row).await;
    assert_eq!(locked_by.as_deref(), Some("proc-b"));

    repo.mark_sent(&row, "1").await.unwrap();
}

/// Persisted error messages are truncated to 500 characters.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn long_errors_are_truncated() {
    let db = connect().await;
    purge_outbox(&db).await;
    let conversation = seed_conversation(&db).await;
    let row = seed_outbox_row(&db, &conversation, 3).await;
    let repo = OutboxRepo::new(Arc::clone(&db));

    repo.claim_next("proc-a").await.unwrap();
    let long_error = "x".repeat(900);
    repo.mark_failed(&row, 0, 3, &long_error).await.unwrap();

    let stored: String =
        sqlx::query_scalar("SELECT error_message FROM outgoing_message WHERE id = $1")
            .bind(&row)
            .fetch_one(db.as_ref())
            .await
            .expect("error message");
    assert_eq!(stored.len(), 500);
}
