//! In-memory worker status snapshot shared with the HTTP surface.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::models::listener_state::{ErrorEntry, ListenerStatus};

/// Heartbeats older than this make the worker report unhealthy.
pub const HEALTH_STALE_AFTER_SECS: i64 = 300;

/// In-memory errors retained.
const ERROR_RING: usize = 20;

/// Errors persisted to the listener-state row on each heartbeat.
pub const PERSISTED_ERRORS: usize = 10;

/// Shared mutable snapshot of the worker's liveness.
///
/// Loops write, the HTTP surface reads. Every section is short and
/// lock-free of awaits, so contention is negligible.
pub struct WorkerStatus {
    status: RwLock<ListenerStatus>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
    messages_received: AtomicI64,
    errors: Mutex<VecDeque<ErrorEntry>>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStatus {
    /// Create a snapshot in the `starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: RwLock::new(ListenerStatus::Starting),
            started_at: RwLock::new(None),
            last_heartbeat: RwLock::new(None),
            messages_received: AtomicI64::new(0),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ListenerStatus {
        self.status.read().map_or(ListenerStatus::Error, |s| *s)
    }

    /// Transition the lifecycle status; entering `running` stamps
    /// `started_at` and a fresh heartbeat.
    pub fn set_status(&self, status: ListenerStatus) {
        if let Ok(mut s) = self.status.write() {
            *s = status;
        }
        if status == ListenerStatus::Running {
            let now = Utc::now();
            if let Ok(mut started) = self.started_at.write() {
                started.get_or_insert(now);
            }
            self.touch_heartbeat();
        }
    }

    /// Record a heartbeat tick.
    pub fn touch_heartbeat(&self) {
        if let Ok(mut hb) = self.last_heartbeat.write() {
            *hb = Some(Utc::now());
        }
    }

    /// Most recent heartbeat, if any.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat.read().ok().and_then(|hb| *hb)
    }

    /// When the worker entered `running`, if it has.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.read().ok().and_then(|s| *s)
    }

    /// Bump the ingested-message counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Lifetime ingested-message counter for this process.
    #[must_use]
    pub fn messages_received(&self) -> i64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Append to the rolling error list.
    pub fn record_error(&self, error: impl Into<String>) {
        let entry = ErrorEntry {
            error: error.into(),
            timestamp: Utc::now(),
        };
        if let Ok(mut errors) = self.errors.lock() {
            errors.push_back(entry);
            while errors.len() > ERROR_RING {
                errors.pop_front();
            }
        }
    }

    /// The newest `limit` recorded errors, oldest first.
    #[must_use]
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorEntry> {
        self.errors.lock().map_or_else(
            |_| Vec::new(),
            |errors| {
                let skip = errors.len().saturating_sub(limit);
                errors.iter().skip(skip).cloned().collect()
            },
        )
    }

    /// Coarse liveness decision for `GET /health`.
    #[must_use]
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        is_healthy(self.status(), self.last_heartbeat(), now)
    }

    /// Uptime in seconds since entering `running`.
    #[must_use]
    pub fn uptime_secs(&self, now: DateTime<Utc>) -> i64 {
        self.started_at()
            .map_or(0, |started| (now - started).num_seconds().max(0))
    }
}

/// Health rule: `running` with a fresh heartbeat is healthy, `starting`
/// gets a grace period, everything else is unhealthy.
#[must_use]
pub fn is_healthy(
    status: ListenerStatus,
    last_heartbeat: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match status {
        ListenerStatus::Starting => true,
        ListenerStatus::Running => last_heartbeat
            .is_some_and(|hb| (now - hb).num_seconds() < HEALTH_STALE_AFTER_SECS),
        _ => false,
    }
}
