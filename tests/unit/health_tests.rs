use chrono::{Duration, Utc};

use telegram_syncd::models::listener_state::ListenerStatus;
use telegram_syncd::sync::status::{is_healthy, HEALTH_STALE_AFTER_SECS};

#[test]
fn starting_is_healthy_without_heartbeat() {
    let now = Utc::now();
    assert!(is_healthy(ListenerStatus::Starting, None, now));
}

#[test]
fn running_with_fresh_heartbeat_is_healthy() {
    let now = Utc::now();
    let heartbeat = Some(now - Duration::seconds(10));
    assert!(is_healthy(ListenerStatus::Running, heartbeat, now));
}

#[test]
fn running_with_stale_heartbeat_is_unhealthy() {
    let now = Utc::now();
    let heartbeat = Some(now - Duration::seconds(HEALTH_STALE_AFTER_SECS + 1));
    assert!(!is_healthy(ListenerStatus::Running, heartbeat, now));
}

#[test]
fn running_without_heartbeat_is_unhealthy() {
    assert!(!is_healthy(ListenerStatus::Running, None, Utc::now()));
}

#[test]
fn terminal_statuses_are_unhealthy() {
    let now = Utc::now();
    let fresh = Some(now);
    for status in [
        ListenerStatus::Restarting,
        ListenerStatus::Stopped,
        ListenerStatus::Error,
        ListenerStatus::Failed,
    ] {
        assert!(!is_healthy(status, fresh, now), "{status:?} must be unhealthy");
    }
}
