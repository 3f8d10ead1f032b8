//! Contact presence model.

use serde::{Deserialize, Serialize};

/// Coarse presence bucket mirrored from Telegram user status updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Currently connected.
    Online,
    /// Offline with a known last-seen timestamp.
    Offline,
    /// Seen within the last couple of days (exact time hidden).
    Recently,
    /// Seen within the last week.
    LastWeek,
    /// Seen within the last month.
    LastMonth,
    /// No status information available.
    Unknown,
}

impl PresenceStatus {
    /// Serialize to the database string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Recently => "recently",
            Self::LastWeek => "last_week",
            Self::LastMonth => "last_month",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this bucket means the user is connected right now.
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}
