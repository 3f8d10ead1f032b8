//! Outbox model — queued outbound messages drained by the sender loop.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an outbox row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a sender and in flight.
    Sending,
    /// Delivered upstream.
    Sent,
    /// Retry budget exhausted.
    Failed,
}

impl OutboxStatus {
    /// Serialize to the database string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse a database string into the enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Attachment kind recorded on an outbox row; selects the upstream send path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Inline photo with optional caption.
    Photo,
    /// Voice note.
    Voice,
    /// Video.
    Video,
    /// Generic document.
    Document,
    /// Audio file.
    Audio,
}

impl AttachmentKind {
    /// Parse a database string into the enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "voice" => Some(Self::Voice),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// A claimed outbox row, as returned by the atomic claim statement.
#[derive(Debug, Clone)]
pub struct ClaimedOutboxMessage {
    /// Record identifier.
    pub id: String,
    /// Target conversation.
    pub conversation_id: String,
    /// Text body (or caption fallback when an attachment is present).
    pub text: Option<String>,
    /// External id of the message being replied to, if any.
    pub reply_to_message_id: Option<String>,
    /// Attachment kind string, unset for plain text.
    pub attachment_kind: Option<String>,
    /// Storage key resolving the attachment payload.
    pub attachment_key: Option<String>,
    /// Original file name.
    pub attachment_name: Option<String>,
    /// MIME type of the attachment.
    pub attachment_mime: Option<String>,
    /// Caption overriding the text body.
    pub attachment_caption: Option<String>,
    /// Failed attempts so far.
    pub retry_count: i32,
    /// Retry budget.
    pub max_retries: i32,
}
