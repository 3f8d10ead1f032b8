//! Production [`TelegramApi`] implementation over `grammers-client`.
//!
//! The adapter owns the `MTProto` client plus a packed-chat cache so that
//! marked chat ids (users positive, groups and channels negative) can be
//! resolved back to API peers without re-fetching dialogs on every call.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use grammers_client::types::{Chat, Media, Message};
use grammers_client::{Client, Config as ClientConfig, InitParams, InputMessage, Update};
use grammers_session::{PackedChat, PackedType, Session};
use grammers_tl_types as tl;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::contact::PresenceStatus;
use crate::models::conversation::ChatKind;
use crate::models::outbox::AttachmentKind;

use super::api::{
    ChatProfile, DialogSnapshot, MediaPayload, OutboundFile, PresenceUpdate, TelegramApi,
    TelegramError, TelegramEvent, UpstreamMessage, UpstreamSender,
};

/// Grammers-backed Telegram client.
pub struct GrammersApi {
    client: Client,
    session_file: PathBuf,
    chats: Mutex<HashMap<i64, PackedChat>>,
}

impl GrammersApi {
    /// Connect using the session file prepared by the session manager.
    ///
    /// # Errors
    ///
    /// Returns `TelegramError::Auth` when the session is unusable or not
    /// authorized, `TelegramError::Rpc` on connection failure.
    pub async fn connect(config: &Config) -> Result<Self, TelegramError> {
        let session_file = config.session_path.with_extension("session");
        let session = Session::load_file_or_create(&session_file)
            .map_err(|err| TelegramError::Auth(format!("cannot load session file: {err}")))?;

        let client = Client::connect(ClientConfig {
            session,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            params: InitParams {
                catch_up: true,
                ..InitParams::default()
            },
        })
        .await
        .map_err(|err| TelegramError::Rpc(format!("connect failed: {err}")))?;

        if !client.is_authorized().await.map_err(map_err)? {
            return Err(TelegramError::Auth("session not authorized".into()));
        }

        let me = client.get_me().await.map_err(map_err)?;
        debug!(user = %me.full_name(), "connected to telegram");

        Ok(Self {
            client,
            session_file,
            chats: Mutex::new(HashMap::new()),
        })
    }

    fn remember(&self, chat: &Chat) {
        if let Ok(mut chats) = self.chats.lock() {
            chats.insert(mark_chat_id(chat), chat.pack());
        }
    }

    fn cached(&self, chat_id: i64) -> Option<PackedChat> {
        self.chats.lock().ok().and_then(|c| c.get(&chat_id).copied())
    }

    /// Resolve a marked chat id to a packed peer, re-walking the dialog
    /// list once on a cache miss to pick up access hashes.
    async fn resolve(&self, chat_id: i64) -> Result<PackedChat, TelegramError> {
        if let Some(packed) = self.cached(chat_id) {
            return Ok(packed);
        }

        let mut iter = self.client.iter_dialogs();
        while let Some(dialog) = iter.next().await.map_err(map_err)? {
            self.remember(dialog.chat());
        }

        self.cached(chat_id)
            .ok_or_else(|| TelegramError::NotFound(format!("chat {chat_id} not in dialogs")))
    }

    fn normalize(&self, msg: &Message) -> UpstreamMessage {
        let chat = msg.chat();
        self.remember(&chat);

        let sender = msg.sender().and_then(|s| match s {
            Chat::User(_) => Some(UpstreamSender {
                id: s.id(),
                display_name: Some(s.name().to_string()).filter(|n| !n.is_empty()),
                username: s.username().map(str::to_owned),
            }),
            _ => None,
        });

        UpstreamMessage {
            chat_id: mark_chat_id(&chat),
            id: i64::from(msg.id()),
            text: msg.text().to_string(),
            sent_at: msg.date(),
            outgoing: msg.outgoing(),
            has_media: msg.media().is_some(),
            sender,
        }
    }

    async fn fetch_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<Message>, TelegramError> {
        let packed = self.resolve(chat_id).await?;
        #[allow(clippy::cast_possible_truncation)] // Telegram message ids are i32.
        let wanted = message_id as i32;
        let mut found = self
            .client
            .get_messages_by_id(packed, &[wanted])
            .await
            .map_err(map_err)?;
        Ok(found.pop().flatten())
    }
}

#[async_trait]
impl TelegramApi for GrammersApi {
    async fn next_event(&self) -> Result<TelegramEvent, TelegramError> {
        let update = self.client.next_update().await.map_err(map_err)?;

        Ok(match update {
            Update::NewMessage(msg) => TelegramEvent::NewMessage(self.normalize(&msg)),
            Update::MessageEdited(msg) => TelegramEvent::EditedMessage(self.normalize(&msg)),
            Update::Raw(raw) => raw_event(&raw),
            _ => TelegramEvent::Ignored,
        })
    }

    async fn recent_messages(
        &self,
        chat_id: i64,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<UpstreamMessage>, TelegramError> {
        let packed = self.resolve(chat_id).await?;
        let mut iter = self.client.iter_messages(packed).limit(limit);
        let mut out = Vec::new();

        // Newest first; ids decrease, so the checkpoint floor ends the walk.
        while let Some(msg) = iter.next().await.map_err(map_err)? {
            if i64::from(msg.id()) <= min_id {
                break;
            }
            out.push(self.normalize(&msg));
        }

        Ok(out)
    }

    async fn dialogs(&self, limit: usize) -> Result<Vec<DialogSnapshot>, TelegramError> {
        let mut iter = self.client.iter_dialogs().limit(limit);
        let mut out = Vec::new();

        while let Some(dialog) = iter.next().await.map_err(map_err)? {
            let chat = dialog.chat().clone();
            self.remember(&chat);

            let (unread_count, read_inbox_max_id) = match &dialog.dialog {
                tl::enums::Dialog::Dialog(d) => {
                    (d.unread_count, Some(i64::from(d.read_inbox_max_id)))
                }
                tl::enums::Dialog::Folder(_) => (0, None),
            };

            out.push(DialogSnapshot {
                chat_id: mark_chat_id(&chat),
                title: chat.name().to_string(),
                kind: kind_of(&chat),
                username: chat.username().map(str::to_owned),
                unread_count,
                read_inbox_max_id,
                presence: None,
            });
        }

        Ok(out)
    }

    async fn chat_profile(&self, chat_id: i64) -> Result<ChatProfile, TelegramError> {
        let packed = self.resolve(chat_id).await?;
        let chat = self.client.unpack_chat(packed).await.map_err(map_err)?;

        Ok(ChatProfile {
            chat_id,
            title: chat.name().to_string(),
            kind: kind_of(&chat),
            username: chat.username().map(str::to_owned),
        })
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, TelegramError> {
        let packed = self.resolve(chat_id).await?;
        let mut message = InputMessage::text(text);
        if let Some(reply) = reply_to {
            #[allow(clippy::cast_possible_truncation)] // Telegram message ids are i32.
            let reply = reply as i32;
            message = message.reply_to(Some(reply));
        }

        let sent = self
            .client
            .send_message(packed, message)
            .await
            .map_err(map_err)?;
        Ok(i64::from(sent.id()))
    }

    async fn send_file(
        &self,
        chat_id: i64,
        file: OutboundFile,
        caption: Option<&str>,
        reply_to: Option<i64>,
    ) -> Result<i64, TelegramError> {
        let packed = self.resolve(chat_id).await?;

        let size = file.bytes.len();
        let mut stream = Cursor::new(file.bytes);
        let uploaded = self
            .client
            .upload_stream(&mut stream, size, file.name.clone())
            .await
            .map_err(|err| TelegramError::Rpc(format!("upload failed: {err}")))?;

        let mut message = InputMessage::text(caption.unwrap_or(""));
        message = match file.kind {
            AttachmentKind::Photo => message.photo(uploaded),
            AttachmentKind::Voice | AttachmentKind::Audio => {
                let mime = file.mime.as_deref().unwrap_or("audio/ogg").to_string();
                message.document(uploaded).mime_type(&mime)
            }
            AttachmentKind::Video => {
                let mime = file.mime.as_deref().unwrap_or("video/mp4").to_string();
                message.document(uploaded).mime_type(&mime)
            }
            AttachmentKind::Document => {
                let message = message.document(uploaded);
                match &file.mime {
                    Some(mime) => message.mime_type(mime),
                    None => message,
                }
            }
        };
        if let Some(reply) = reply_to {
            #[allow(clippy::cast_possible_truncation)] // Telegram message ids are i32.
            let reply = reply as i32;
            message = message.reply_to(Some(reply));
        }

        let sent = self
            .client
            .send_message(packed, message)
            .await
            .map_err(map_err)?;
        Ok(i64::from(sent.id()))
    }

    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<MediaPayload>, TelegramError> {
        let Some(msg) = self.fetch_message(chat_id, message_id).await? else {
            return Ok(None);
        };
        let Some(media) = msg.media() else {
            return Ok(None);
        };

        let staging = tempfile::Builder::new()
            .prefix("tg-media-")
            .tempfile()
            .map_err(|err| TelegramError::Rpc(format!("staging file: {err}")))?;

        self.client
            .download_media(&media, staging.path())
            .await
            .map_err(|err| TelegramError::Rpc(format!("download failed: {err}")))?;

        let bytes = std::fs::read(staging.path())
            .map_err(|err| TelegramError::Rpc(format!("read staging file: {err}")))?;

        Ok(Some(MediaPayload {
            bytes,
            mime: media_mime(&media),
            file_name: media_file_name(&media),
        }))
    }

    async fn persist_session(&self) -> Result<(), TelegramError> {
        self.client
            .session()
            .save_to_file(&self.session_file)
            .map_err(|err| TelegramError::Rpc(format!("session save failed: {err}")))
    }
}

/// Map a raw TL update to an engine event.
fn raw_event(raw: &tl::enums::Update) -> TelegramEvent {
    match raw {
        tl::enums::Update::ReadHistoryOutbox(u) => TelegramEvent::ReadOutbox {
            chat_id: mark_peer(&u.peer),
            max_id: i64::from(u.max_id),
        },
        tl::enums::Update::ReadChannelOutbox(u) => TelegramEvent::ReadOutbox {
            chat_id: -u.channel_id,
            max_id: i64::from(u.max_id),
        },
        tl::enums::Update::DialogUnreadMark(u) => match &u.peer {
            tl::enums::DialogPeer::Peer(p) => TelegramEvent::UnreadMark {
                chat_id: mark_peer(&p.peer),
                unread: u.unread,
            },
            tl::enums::DialogPeer::Folder(_) => TelegramEvent::Ignored,
        },
        tl::enums::Update::UserStatus(u) => TelegramEvent::Presence {
            user_id: u.user_id,
            update: presence_from(&u.status),
        },
        _ => TelegramEvent::Ignored,
    }
}

/// Marked chat id: users keep their positive id, groups and channels are
/// negated so the three peer spaces cannot collide in the store's
/// `(source, external_chat_id)` key.
fn mark_chat_id(chat: &Chat) -> i64 {
    match chat {
        Chat::User(_) => chat.id(),
        Chat::Group(_) | Chat::Channel(_) => -chat.id(),
    }
}

fn mark_peer(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(p) => p.user_id,
        tl::enums::Peer::Chat(p) => -p.chat_id,
        tl::enums::Peer::Channel(p) => -p.channel_id,
    }
}

fn kind_of(chat: &Chat) -> ChatKind {
    match chat {
        Chat::User(_) => ChatKind::Private,
        Chat::Group(_) => {
            if matches!(chat.pack().ty, PackedType::Megagroup) {
                ChatKind::Supergroup
            } else {
                ChatKind::Group
            }
        }
        Chat::Channel(_) => ChatKind::Channel,
    }
}

fn presence_from(status: &tl::enums::UserStatus) -> PresenceUpdate {
    use tl::enums::UserStatus as TlStatus;

    match status {
        TlStatus::Online(_) => PresenceUpdate {
            status: PresenceStatus::Online,
            last_seen_at: None,
        },
        TlStatus::Offline(s) => PresenceUpdate {
            status: PresenceStatus::Offline,
            last_seen_at: Utc.timestamp_opt(i64::from(s.was_online), 0).single(),
        },
        TlStatus::Recently { .. } => PresenceUpdate {
            status: PresenceStatus::Recently,
            last_seen_at: None,
        },
        TlStatus::LastWeek { .. } => PresenceUpdate {
            status: PresenceStatus::LastWeek,
            last_seen_at: None,
        },
        TlStatus::LastMonth { .. } => PresenceUpdate {
            status: PresenceStatus::LastMonth,
            last_seen_at: None,
        },
        _ => PresenceUpdate {
            status: PresenceStatus::Unknown,
            last_seen_at: None,
        },
    }
}

fn media_mime(media: &Media) -> Option<String> {
    match media {
        Media::Photo(_) => Some("image/jpeg".to_string()),
        Media::Document(doc) => Some(doc.mime_type().to_string()),
        _ => None,
    }
}

fn media_file_name(media: &Media) -> Option<String> {
    match media {
        Media::Document(doc) => Some(doc.name().to_string()).filter(|n| !n.is_empty()),
        _ => None,
    }
}

/// Classify a grammers error by its wire name.
///
/// Parsing the rendered message keeps the mapping stable across client
/// versions; the RPC names themselves are part of Telegram's contract.
fn map_err(err: impl std::fmt::Display) -> TelegramError {
    let text = err.to_string();

    if let Some(secs) = parse_flood_wait(&text) {
        return TelegramError::FloodWait(secs);
    }
    if text.contains("CHANNEL_PRIVATE")
        || text.contains("CHAT_ADMIN_REQUIRED")
        || text.contains("CHAT_FORBIDDEN")
    {
        return TelegramError::AccessDenied(text);
    }
    if text.contains("PEER_ID_INVALID") || text.contains("USER_ID_INVALID") {
        return TelegramError::NotFound(text);
    }
    if text.contains("AUTH_KEY") || text.contains("SESSION_REVOKED") {
        return TelegramError::Auth(text);
    }

    TelegramError::Rpc(text)
}

/// Extract the wait from a `FLOOD_WAIT` error message.
///
/// Handles both rendered forms: `FLOOD_WAIT (42)` and `FLOOD_WAIT_42`.
fn parse_flood_wait(err: &str) -> Option<u64> {
    if !err.contains("FLOOD_WAIT") {
        return None;
    }

    if let Some(start) = err.find("FLOOD_WAIT (") {
        let rest = &err[start + 12..];
        if let Some(end) = rest.find(')') {
            if let Ok(secs) = rest[..end].trim().parse::<u64>() {
                return Some(secs);
            }
        }
    }

    if let Some(idx) = err.find("FLOOD_WAIT_") {
        let rest = &err[idx + 11..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(secs) = digits.parse::<u64>() {
            return Some(secs);
        }
    }

    warn!(error = err, "unparsable FLOOD_WAIT; defaulting to 60s");
    Some(60)
}
