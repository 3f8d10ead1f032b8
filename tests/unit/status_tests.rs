use chrono::Utc;

use telegram_syncd::models::listener_state::ListenerStatus;
use telegram_syncd::sync::status::WorkerStatus;

#[test]
fn new_status_starts_in_starting() {
    let status = WorkerStatus::new();
    assert_eq!(status.status(), ListenerStatus::Starting);
    assert!(status.started_at().is_none());
    assert!(status.last_heartbeat().is_none());
    assert_eq!(status.messages_received(), 0);
}

#[test]
fn entering_running_stamps_started_at_and_heartbeat() {
    let status = WorkerStatus::new();
    status.set_status(ListenerStatus::Running);

    assert_eq!(status.status(), ListenerStatus::Running);
    assert!(status.started_at().is_some());
    assert!(status.last_heartbeat().is_some());
    assert!(status.is_healthy(Utc::now()));
}

#[test]
fn started_at_survives_repeated_running_transitions() {
    let status = WorkerStatus::new();
    status.set_status(ListenerStatus::Running);
    let first = status.started_at().expect("stamped");

    status.set_status(ListenerStatus::Running);
    assert_eq!(status.started_at(), Some(first));
}

#[test]
fn message_counter_accumulates() {
    let status = WorkerStatus::new();
    for _ in 0..5 {
        status.increment_messages();
    }
    assert_eq!(status.messages_received(), 5);
}

#[test]
fn error_ring_keeps_the_newest_twenty() {
    let status = WorkerStatus::new();
    for i in 0..25 {
        status.record_error(format!("error {i}"));
    }

    let all = status.recent_errors(100);
    assert_eq!(all.len(), 20);
    assert_eq!(all.first().map(|e| e.error.as_str()), Some("error 5"));
    assert_eq!(all.last().map(|e| e.error.as_str()), Some("error 24"));
}

#[test]
fn recent_errors_returns_the_newest_slice() {
    let status = WorkerStatus::new();
    for i in 0..15 {
        status.record_error(format!("error {i}"));
    }

    let last_ten = status.recent_errors(10);
    assert_eq!(last_ten.len(), 10);
    assert_eq!(last_ten.first().map(|e| e.error.as_str()), Some("error 5"));
    assert_eq!(last_ten.last().map(|e| e.error.as_str()), Some("error 14"));
}

#[test]
fn stopped_worker_reports_unhealthy() {
    let status = WorkerStatus::new();
    status.set_status(ListenerStatus::Running);
    status.set_status(ListenerStatus::Stopped);
    assert!(!status.is_healthy(Utc::now()));
}
