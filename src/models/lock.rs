//! Distributed lock model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lock categories with fixed nominal lease durations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    /// Singleton realtime listener; long lease, refreshed by heartbeat.
    Listener,
    /// Ad-hoc bulk sync over all conversations.
    Global,
    /// Ad-hoc sync of a single conversation.
    Single,
}

impl LockType {
    /// Nominal lease duration for this lock type.
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Listener => Duration::minutes(30),
            Self::Global => Duration::minutes(5),
            Self::Single => Duration::minutes(2),
        }
    }

    /// Serialize to the database string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::Global => "global",
            Self::Single => "single",
        }
    }
}

/// Descriptor of a live lock holder, as returned by `check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    /// Holder's process id, stringified.
    pub process_id: String,
    /// Holder's hostname.
    pub hostname: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Most recent heartbeat refresh.
    pub heartbeat_at: DateTime<Utc>,
    /// Free-form metadata recorded at acquisition.
    pub metadata: Option<serde_json::Value>,
}
