//! Upstream abstraction — the surface of Telegram the sync engine consumes.
//!
//! The engine never touches the `MTProto` client directly; everything flows
//! through [`TelegramApi`]. The production implementation lives in
//! [`super::client`]; tests drive the engine with scripted fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::contact::PresenceStatus;
use crate::models::conversation::ChatKind;
use crate::models::outbox::AttachmentKind;
use crate::AppError;

/// Upstream failure modes the engine distinguishes.
#[derive(Debug)]
pub enum TelegramError {
    /// Server-mandated rate limit; carries the wait in seconds.
    FloodWait(u64),
    /// Chat is private, requires admin rights, or the entity is gone.
    AccessDenied(String),
    /// Referenced chat or message does not exist.
    NotFound(String),
    /// Session is missing or not authorized.
    Auth(String),
    /// Any other RPC or connection failure.
    Rpc(String),
}

impl std::fmt::Display for TelegramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FloodWait(secs) => write!(f, "flood wait {secs}s"),
            Self::AccessDenied(msg) => write!(f, "access denied: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::Rpc(msg) => write!(f, "rpc: {msg}"),
        }
    }
}

impl std::error::Error for TelegramError {}

impl From<TelegramError> for AppError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::FloodWait(secs) => Self::FloodWait(secs),
            TelegramError::AccessDenied(msg) => Self::AccessDenied(msg),
            TelegramError::NotFound(msg) => Self::NotFound(msg),
            TelegramError::Auth(msg) | TelegramError::Rpc(msg) => Self::Telegram(msg),
        }
    }
}

/// Sender of an upstream message, when the sender is a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSender {
    /// Telegram user id.
    pub id: i64,
    /// Display name assembled from first/last name.
    pub display_name: Option<String>,
    /// Username without the leading `@`.
    pub username: Option<String>,
}

/// A message as observed upstream, normalized for the pipeline.
#[derive(Debug, Clone)]
pub struct UpstreamMessage {
    /// Marked chat id (users positive, groups/channels negative).
    pub chat_id: i64,
    /// Message id within the chat.
    pub id: i64,
    /// Text body; empty for bare media.
    pub text: String,
    /// Send timestamp (UTC).
    pub sent_at: DateTime<Utc>,
    /// Whether the account owner sent it.
    pub outgoing: bool,
    /// Whether it carries media.
    pub has_media: bool,
    /// Sender, when a user.
    pub sender: Option<UpstreamSender>,
}

/// Presence observation for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Coarse presence bucket.
    pub status: PresenceStatus,
    /// Last-seen timestamp, known only for explicit offline statuses.
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// One upstream dialog as returned by a discovery scan.
#[derive(Debug, Clone)]
pub struct DialogSnapshot {
    /// Marked chat id.
    pub chat_id: i64,
    /// Display title.
    pub title: String,
    /// Chat kind.
    pub kind: ChatKind,
    /// Username, when public.
    pub username: Option<String>,
    /// Upstream unread counter.
    pub unread_count: i32,
    /// Highest message id the account owner has read.
    pub read_inbox_max_id: Option<i64>,
    /// Presence of the peer, for private chats.
    pub presence: Option<PresenceUpdate>,
}

/// Descriptor of a chat fetched outside a dialog scan.
#[derive(Debug, Clone)]
pub struct ChatProfile {
    /// Marked chat id.
    pub chat_id: i64,
    /// Display title.
    pub title: String,
    /// Chat kind.
    pub kind: ChatKind,
    /// Username, when public.
    pub username: Option<String>,
}

/// Downloaded media payload for the HTTP surface.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// MIME type, when upstream metadata carries one.
    pub mime: Option<String>,
    /// Original file name, when known.
    pub file_name: Option<String>,
}

/// Outbound attachment handed to the upstream send path.
#[derive(Debug, Clone)]
pub struct OutboundFile {
    /// Kind selecting the dispatch path.
    pub kind: AttachmentKind,
    /// Raw payload.
    pub bytes: Vec<u8>,
    /// File name presented to recipients.
    pub name: String,
    /// MIME type.
    pub mime: Option<String>,
}

/// Realtime events surfaced by the upstream stream.
#[derive(Debug, Clone)]
pub enum TelegramEvent {
    /// A new message arrived.
    NewMessage(UpstreamMessage),
    /// An existing message was edited.
    EditedMessage(UpstreamMessage),
    /// The account owner read chat `chat_id` up to `max_id` elsewhere.
    ReadOutbox {
        /// Marked chat id.
        chat_id: i64,
        /// Highest message id now read.
        max_id: i64,
    },
    /// A dialog was explicitly marked (un)read.
    UnreadMark {
        /// Marked chat id.
        chat_id: i64,
        /// True when marked unread.
        unread: bool,
    },
    /// A user's presence changed.
    Presence {
        /// Telegram user id.
        user_id: i64,
        /// New presence observation.
        update: PresenceUpdate,
    },
    /// An update the engine does not consume.
    Ignored,
}

/// The upstream operations the sync engine requires.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Await the next realtime event. Long-running; cancel-safe at the
    /// awaited RPC boundary.
    ///
    /// # Errors
    ///
    /// Returns a [`TelegramError`] when the update stream fails.
    async fn next_event(&self) -> Result<TelegramEvent, TelegramError>;

    /// Fetch up to `limit` messages of a chat with id greater than
    /// `min_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`TelegramError`] when the history fetch fails.
    async fn recent_messages(
        &self,
        chat_id: i64,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<UpstreamMessage>, TelegramError>;

    /// Enumerate up to `limit` dialogs.
    ///
    /// # Errors
    ///
    /// Returns a [`TelegramError`] when the dialog scan fails.
    async fn dialogs(&self, limit: usize) -> Result<Vec<DialogSnapshot>, TelegramError>;

    /// Fetch the descriptor of a single chat.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::NotFound`] for chats the account cannot
    /// see, other variants on RPC failure.
    async fn chat_profile(&self, chat_id: i64) -> Result<ChatProfile, TelegramError>;

    /// Send a plain text message; returns the new message id.
    ///
    /// # Errors
    ///
    /// Returns a [`TelegramError`] when the send fails.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, TelegramError>;

    /// Send a file per the attachment dispatch matrix; returns the new
    /// message id.
    ///
    /// # Errors
    ///
    /// Returns a [`TelegramError`] when the upload or send fails.
    async fn send_file(
        &self,
        chat_id: i64,
        file: OutboundFile,
        caption: Option<&str>,
        reply_to: Option<i64>,
    ) -> Result<i64, TelegramError>;

    /// Download the media of a stored message, if it has any.
    ///
    /// # Errors
    ///
    /// Returns a [`TelegramError`] when the lookup or download fails.
    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<MediaPayload>, TelegramError>;

    /// Flush the live session state to its on-disk file.
    ///
    /// # Errors
    ///
    /// Returns a [`TelegramError`] when the session cannot be written.
    async fn persist_session(&self) -> Result<(), TelegramError>;
}
