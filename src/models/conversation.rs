//! Conversation model — one row per mirrored Telegram chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of Telegram chat backing a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// One-on-one chat with a user.
    Private,
    /// Basic group.
    Group,
    /// Megagroup.
    Supergroup,
    /// Broadcast channel.
    Channel,
}

impl ChatKind {
    /// Serialize to the database string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
        }
    }

    /// Parse a database string into the enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            "supergroup" => Some(Self::Supergroup),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }
}

/// Conversation domain entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Conversation {
    /// Opaque record identifier.
    pub id: String,
    /// Upstream source tag; always `telegram` for this worker.
    pub source: String,
    /// Marked Telegram chat id, stringified.
    pub external_chat_id: String,
    /// Display title.
    pub title: String,
    /// Chat kind.
    pub kind: ChatKind,
    /// When true the ingestion pipeline drops messages for this chat.
    pub sync_disabled: bool,
    /// Monotone checkpoint: highest ingested external message id, stringified.
    pub last_synced_message_id: Option<String>,
    /// When the checkpoint last advanced.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Timestamp of the newest known message.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Unread inbound messages.
    pub unread_count: i32,
    /// Highest external message id acknowledged as read.
    pub last_read_message_id: Option<String>,
    /// When the conversation was last marked read.
    pub last_read_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Minimal conversation view held in the process-local resolution cache.
#[derive(Debug, Clone)]
pub struct CachedConversation {
    /// Opaque record identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Chat kind.
    pub kind: ChatKind,
    /// Mirrors the `sync_disabled` column.
    pub sync_disabled: bool,
}

/// Deterministic conversation id for a Telegram chat.
///
/// Stable across processes so concurrent creators collide on the same row
/// instead of racing to distinct ids.
#[must_use]
pub fn conversation_id(chat_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("telegram-{chat_id}").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("c{}", &digest[..24])
}
