use std::sync::Arc;

use serial_test::serial;
use telegram_syncd::locking::LockManager;
use telegram_syncd::models::lock::LockType;

use super::test_helpers::{connect, unique_key};

/// Only one acquirer wins a given `(lock_type, lock_key)`.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn acquire_is_exclusive() {
    let db = connect().await;
    let key = unique_key("excl");
    let first = LockManager::new(Arc::clone(&db));
    let second = LockManager::new(Arc::clone(&db));

    assert!(first.acquire(LockType::Global, &key, None).await.unwrap());
    assert!(!second.acquire(LockType::Global, &key, None).await.unwrap());

    first.release(LockType::Global, &key).await.unwrap();
}

/// Releasing frees the lock for the next acquirer.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn release_frees_the_lock() {
    let db = connect().await;
    let key = unique_key("rel");
    let manager = LockManager::new(db);

    assert!(manager.acquire(LockType::Single, &key, None).await.unwrap());
    manager.release(LockType::Single, &key).await.unwrap();
    assert!(manager.acquire(LockType::Single, &key, None).await.unwrap());

    manager.release_all().await.unwrap();
}

/// An expired lease is semantically absent: the next acquire wins.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn expired_lease_is_reclaimed() {
    let db = connect().await;
    let key = unique_key("expired");
    let manager = LockManager::new(Arc::clone(&db));

    sqlx::query(
        "INSERT INTO sync_lock (id, lock_type, lock_key, process_id, hostname,
                                acquired_at, heartbeat_at, expires_at)
         VALUES ($1, 'global', $2, '1', 'remote-host',
                 NOW() - INTERVAL '10 minutes', NOW() - INTERVAL '10 minutes',
                 NOW() - INTERVAL '5 minutes')",
    )
    .bind(unique_key("row"))
    .bind(&key)
    .execute(db.as_ref())
    .await
    .expect("seed expired lock");

    assert!(manager.acquire(LockType::Global, &key, None).await.unwrap());
    manager.release_all().await.unwrap();
}

/// A same-host lease whose holder PID is gone is reaped immediately.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn dead_local_holder_is_reaped() {
    let db = connect().await;
    let key = unique_key("deadpid");
    let manager = LockManager::new(Arc::clone(&db));

    // i32::MAX is above every real PID range, so the probe fails.
    sqlx::query(
        "INSERT INTO sync_lock (id, lock_type, lock_key, process_id, hostname,
                                acquired_at, heartbeat_at, expires_at)
         VALUES ($1, 'listener', $2, '2147483646', $3,
                 NOW(), NOW(), NOW() + INTERVAL '30 minutes')",
    )
    .bind(unique_key("row"))
    .bind(&key)
    .bind(manager.hostname())
    .execute(db.as_ref())
    .await
    .expect("seed dead-holder lock");

    assert!(
        manager.acquire(LockType::Listener, &key, None).await.unwrap(),
        "dead same-host holder must be reaped during acquire"
    );
    manager.release_all().await.unwrap();
}

/// Remote holders are never PID-probed; a live remote lease blocks until
/// expiry.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn remote_lease_blocks_and_is_reported() {
    let db = connect().await;
    let key = unique_key("remote");
    let manager = LockManager::new(Arc::clone(&db));

    sqlx::query(
        "INSERT INTO sync_lock (id, lock_type, lock_key, process_id, hostname,
                                acquired_at, heartbeat_at, expires_at)
         VALUES ($1, 'listener', $2, '1', 'some-other-host',
                 NOW(), NOW(), NOW() + INTERVAL '30 minutes')",
    )
    .bind(unique_key("row"))
    .bind(&key)
    .execute(db.as_ref())
    .await
    .expect("seed remote lock");

    assert!(!manager.acquire(LockType::Listener, &key, None).await.unwrap());

    let holder = manager
        .check(LockType::Listener, &key, true)
        .await
        .unwrap()
        .expect("holder reported");
    assert_eq!(holder.hostname, "some-other-host");
    assert_eq!(holder.process_id, "1");

    manager.force_release(LockType::Listener, &key).await.unwrap();
}

/// Heartbeats refresh every held lease.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn heartbeat_refreshes_held_leases() {
    let db = connect().await;
    let key = unique_key("hb");
    let manager = LockManager::new(Arc::clone(&db));

    assert!(manager.acquire(LockType::Single, &key, None).await.unwrap());

    let before: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(
        "SELECT expires_at FROM sync_lock WHERE lock_type = 'single' AND lock_key = $1",
    )
    .bind(&key)
    .fetch_one(db.as_ref())
    .await
    .expect("read expiry");

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    assert_eq!(manager.heartbeat().await.unwrap(), 1);

    let after: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(
        "SELECT expires_at FROM sync_lock WHERE lock_type = 'single' AND lock_key = $1",
    )
    .bind(&key)
    .fetch_one(db.as_ref())
    .await
    .expect("read expiry");

    assert!(after > before, "heartbeat must extend the lease");
    manager.release_all().await.unwrap();
}

/// `check` on a free lock reports nothing.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn check_reports_free_lock_as_absent() {
    let db = connect().await;
    let manager = LockManager::new(db);

    let holder = manager
        .check(LockType::Global, &unique_key("free"), true)
        .await
        .unwrap();
    assert!(holder.is_none());
}

/// `release_all` drops every lease this process holds.
#[tokio::test]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
#[serial]
async fn release_all_drops_every_held_lease() {
    let db = connect().await;
    let key_a = unique_key("all-a");
    let key_b = unique_key("all-b");
    let manager = LockManager::new(db);

    assert!(manager.acquire(LockType::Global, &key_a, None).await.unwrap());
    assert!(manager.acquire(LockType::Single, &key_b, None).await.unwrap());

    assert_eq!(manager.release_all().await.unwrap(), 2);
    assert!(manager.check(LockType::Global, &key_a, false).await.unwrap().is_none());
    assert!(manager.check(LockType::Single, &key_b, false).await.unwrap().is_none());
}
