//! Listener state model — the shared singleton liveness row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the realtime listener.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListenerStatus {
    /// Process booted, not yet consuming events.
    Starting,
    /// Consuming events and heartbeating.
    Running,
    /// Crashed and waiting out the restart backoff.
    Restarting,
    /// Cleanly shut down.
    Stopped,
    /// Recoverable error surfaced by the last iteration.
    Error,
    /// Restart budget exhausted; supervisor intervention required.
    Failed,
}

impl ListenerStatus {
    /// Serialize to the database string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }

    /// Parse a database string into the enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "restarting" => Some(Self::Restarting),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Timestamped entry in the rolling error list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEntry {
    /// Human-readable error description.
    pub error: String,
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the persisted listener state singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerState {
    /// Current lifecycle status.
    pub status: ListenerStatus,
    /// When the listener last entered `running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Most recent heartbeat.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Lifetime ingested-message counter.
    pub messages_received: i64,
    /// Most recent persisted errors.
    pub errors: Vec<ErrorEntry>,
    /// Owning process id.
    pub process_id: Option<String>,
    /// Owning hostname.
    pub hostname: Option<String>,
}
