//! Message model and the upstream-to-store projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Direction of a mirrored message relative to the account owner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sent to the account owner.
    Inbound,
    /// Sent by the account owner.
    Outbound,
}

impl Direction {
    /// Serialize to the database string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    /// Parse a database string into the enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Coarse content classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Plain text body.
    Text,
    /// Carries a photo, document, or other media.
    Media,
}

impl ContentType {
    /// Serialize to the database string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
        }
    }
}

/// Sender descriptor embedded redundantly in the message metadata blob so
/// a message with no resolved contact still displays a sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderInfo {
    /// Telegram user id, stringified.
    pub telegram_id: String,
    /// Display name, when known.
    pub name: Option<String>,
    /// Username without the leading `@`, when set.
    pub username: Option<String>,
}

/// Normalized message record ready for the idempotent insert.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Deterministic record identifier.
    pub id: String,
    /// Upstream message id, stringified.
    pub external_message_id: String,
    /// Message direction.
    pub direction: Direction,
    /// Content classification.
    pub content_type: ContentType,
    /// Text body; empty for bare media.
    pub body: String,
    /// Upstream send timestamp (UTC).
    pub sent_at: DateTime<Utc>,
    /// Delivery status string.
    pub status: &'static str,
    /// Whether the message carries media.
    pub has_attachments: bool,
    /// Sender's Telegram user id, when the sender is a user.
    pub sender_telegram_id: Option<String>,
    /// Metadata blob with the embedded sender descriptor.
    pub metadata: serde_json::Value,
}

impl MessageRecord {
    /// Build the metadata blob for a sender descriptor.
    #[must_use]
    pub fn metadata_for(sender: Option<&SenderInfo>) -> serde_json::Value {
        match sender {
            Some(info) => serde_json::json!({ "sender": info }),
            None => serde_json::json!({ "sender": null }),
        }
    }
}

/// Deterministic message id derived from the upstream id and timestamp.
///
/// Stable across every producer so duplicate sightings hash to the same
/// row id before the database-level conflict check even runs.
#[must_use]
pub fn message_id(external_message_id: i64, sent_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{external_message_id}-{}", sent_at.timestamp()).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("m{}", &digest[..24])
}
