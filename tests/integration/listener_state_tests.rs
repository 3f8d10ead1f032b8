use std::sync::Arc;

use serial_test::serial;
use telegram_syncd::locking::local_hostname;
use telegram_syncd::models::listener_state::{ErrorEntry, ListenerStatus};
use telegram_syncd::persistence::state_repo::StateRepo;

use super::test_helpers::connect;

fn repo(db: Arc<telegram_syncd::persistence::db::Database>) -> StateRepo {
    StateRepo::new(db, std::process::id().to_string(), local_hostname())
}

/// The singleton row is upserted and read back with its error list.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn update_and_read_state_round_trips() {
    let db = connect().await;
    let repo = repo(db);

    let errors = vec![ErrorEntry {
        error: "upstream hiccup".into(),
        timestamp: chrono::Utc::now(),
    }];
    repo.update_state(ListenerStatus::Running, 42, &errors)
        .await
        .expect("update state");

    let state = repo.get_state().await.expect("read state").expect("row exists");
    assert_eq!(state.status, ListenerStatus::Running);
    assert_eq!(state.messages_received, 42);
    assert!(state.started_at.is_some());
    assert!(state.last_heartbeat.is_some());
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].error, "upstream hiccup");
    assert_eq!(state.process_id.as_deref(), Some(repo_pid().as_str()));
}

/// `started_at` is stamped on the transition into running and survives
/// subsequent heartbeats.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn started_at_survives_heartbeats() {
    let db = connect().await;
    let repo = repo(db);

    repo.update_state(ListenerStatus::Stopped, 0, &[])
        .await
        .expect("reset state");
    repo.update_state(ListenerStatus::Running, 0, &[])
        .await
        .expect("enter running");

    let first = repo
        .get_state()
        .await
        .expect("read")
        .expect("row")
        .started_at
        .expect("stamped");

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    repo.update_state(ListenerStatus::Running, 5, &[])
        .await
        .expect("heartbeat");

    let second = repo
        .get_state()
        .await
        .expect("read")
        .expect("row")
        .started_at
        .expect("still stamped");
    assert_eq!(first, second);
}

/// The message counter accumulates and refreshes the heartbeat.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn increment_messages_accumulates() {
    let db = connect().await;
    let repo = repo(db);

    repo.update_state(ListenerStatus::Running, 10, &[])
        .await
        .expect("seed state");
    repo.increment_messages(3).await.expect("increment");

    let state = repo.get_state().await.expect("read").expect("row");
    assert_eq!(state.messages_received, 13);
}

fn repo_pid() -> String {
    std::process::id().to_string()
}
