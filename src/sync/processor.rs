//! Message processor — the sole writer of inbound messages.
//!
//! One consumer drains the router queue in FIFO order. Each item runs
//! through conversation resolution (cache, store, auto-create), the
//! upstream-to-store projection, contact resolution, an idempotent insert,
//! and a single conversation-row advance, all inside one transaction, so
//! a failure leaves the dedup key unconsumed and the message retryable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::conversation::CachedConversation;
use crate::models::message::{Direction, ContentType, MessageRecord, SenderInfo};
use crate::persistence::contact_repo::ContactRepo;
use crate::persistence::conversation_repo::ConversationRepo;
use crate::persistence::db::Database;
use crate::persistence::message_repo::MessageRepo;
use crate::persistence::state_repo::StateRepo;
use crate::telegram::api::{PresenceUpdate, UpstreamMessage};
use crate::Result;

use super::discovery::Discovery;
use super::router::{QueueItem, RecentSet, SourceTag};
use super::status::WorkerStatus;

/// Result of a conversation-cache probe.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// The key has never been looked up.
    Uncached,
    /// The store was consulted and holds no such conversation.
    KnownAbsent,
    /// The conversation is known.
    Found(CachedConversation),
}

/// Process-local cache of conversation lookups keyed by external chat id.
///
/// Negative results are cached too so repeated messages from an unknown,
/// uncreatable chat do not hammer the store.
#[derive(Default)]
pub struct ConversationCache {
    map: Mutex<HashMap<String, Option<CachedConversation>>>,
}

impl ConversationCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe the cache.
    #[must_use]
    pub fn get(&self, external_chat_id: &str) -> CacheLookup {
        let Ok(map) = self.map.lock() else {
            return CacheLookup::Uncached;
        };
        match map.get(external_chat_id) {
            None => CacheLookup::Uncached,
            Some(None) => CacheLookup::KnownAbsent,
            Some(Some(conversation)) => CacheLookup::Found(conversation.clone()),
        }
    }

    /// Record a lookup result (including a miss).
    pub fn put(&self, external_chat_id: String, value: Option<CachedConversation>) {
        if let Ok(mut m) = self.map.lock() {
            m.insert(external_chat_id, value);
        }
    }
}

/// Project a normalized upstream message into a store record.
///
/// Returns `None` for malformed messages, which are dropped silently.
#[must_use]
pub fn project_message(msg: &UpstreamMessage) -> Option<MessageRecord> {
    if msg.id <= 0 {
        return None;
    }

    let direction = if msg.outgoing {
        Direction::Outbound
    } else {
        Direction::Inbound
    };

    let sender = msg.sender.as_ref().map(|s| SenderInfo {
        telegram_id: s.id.to_string(),
        name: s.display_name.clone().or_else(|| s.username.clone()),
        username: s.username.clone(),
    });

    Some(MessageRecord {
        id: crate::models::message::message_id(msg.id, msg.sent_at),
        external_message_id: msg.id.to_string(),
        direction,
        content_type: if msg.has_media {
            ContentType::Media
        } else {
            ContentType::Text
        },
        body: msg.text.clone(),
        sent_at: msg.sent_at,
        status: if msg.outgoing { "sent" } else { "received" },
        has_attachments: msg.has_media,
        sender_telegram_id: sender.as_ref().map(|s| s.telegram_id.clone()),
        metadata: MessageRecord::metadata_for(sender.as_ref()),
    })
}

/// Single consumer of the ingestion queue.
pub struct MessageProcessor {
    db: Arc<Database>,
    conversations: ConversationRepo,
    messages: MessageRepo,
    contacts: ContactRepo,
    state: StateRepo,
    discovery: Arc<Discovery>,
    cache: Arc<ConversationCache>,
    recent: Arc<Mutex<RecentSet>>,
    status: Arc<WorkerStatus>,
}

impl MessageProcessor {
    /// Wire up a processor over the shared pipeline state.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // One-time wiring at worker startup.
    pub fn new(
        db: Arc<Database>,
        state: StateRepo,
        discovery: Arc<Discovery>,
        cache: Arc<ConversationCache>,
        recent: Arc<Mutex<RecentSet>>,
        status: Arc<WorkerStatus>,
    ) -> Self {
        Self {
            conversations: ConversationRepo::new(Arc::clone(&db)),
            messages: MessageRepo::new(Arc::clone(&db)),
            contacts: ContactRepo::new(Arc::clone(&db)),
            db,
            state,
            discovery,
            cache,
            recent,
            status,
        }
    }

    /// Consume the queue until cancellation.
    ///
    /// This is the only task allowed to run this loop; spawning it twice
    /// would break the single-writer guarantee.
    pub async fn run(&self, mut rx: mpsc::Receiver<QueueItem>, cancel: CancellationToken) {
        info!("message processor started");

        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            self.handle_item(item).await;
        }

        info!("message processor stopped");
    }

    async fn handle_item(&self, item: QueueItem) {
        let key = item.dedup_key();

        // Second dedup check: the key may have been consumed after this
        // item was enqueued. Edits always pass through.
        if item.source != SourceTag::EventEdit
            && self.recent.lock().is_ok_and(|r| r.contains(key))
        {
            return;
        }

        match self.process_message(&item).await {
            Ok(true) => {
                if let Ok(mut recent) = self.recent.lock() {
                    recent.insert(key);
                }
                self.status.increment_messages();
                if let Err(err) = self.state.increment_messages(1).await {
                    debug!(%err, "failed to bump persisted message counter");
                }
            }
            Ok(false) => {}
            Err(err) => {
                // The dedup key stays unconsumed, so the next producer
                // sighting retries this message.
                self.status
                    .record_error(format!("processing {}:{} failed: {err}", key.0, key.1));
                error!(chat_id = key.0, message_id = key.1, %err, "message processing failed");
            }
        }
    }

    /// Process one queue item. Returns whether a row was actually inserted.
    async fn process_message(&self, item: &QueueItem) -> Result<bool> {
        let external_chat_id = item.message.chat_id.to_string();

        let cached = match self.cache.get(&external_chat_id) {
            CacheLookup::Found(conversation) => Some(conversation),
            CacheLookup::KnownAbsent => None,
            CacheLookup::Uncached => {
                let fetched = self.conversations.find_by_external(&external_chat_id).await?;
                self.cache.put(external_chat_id.clone(), fetched.clone());
                fetched
            }
        };

        let conversation = match cached {
            Some(conversation) => conversation,
            None => {
                match self.discovery.create_from_chat(item.message.chat_id).await {
                    Ok(created) => created,
                    Err(err) => {
                        warn!(chat_id = item.message.chat_id, %err,
                              "auto-create failed; dropping message");
                        return Ok(false);
                    }
                }
            }
        };

        if conversation.sync_disabled {
            return Ok(false);
        }

        let Some(record) = project_message(&item.message) else {
            return Ok(false);
        };

        let contact_id = match &record.sender_telegram_id {
            Some(sender) => self.contacts.find_by_identity(sender).await?,
            None => None,
        };

        let mut tx = self.db.begin().await?;
        let inserted = self
            .messages
            .insert_if_absent(&mut tx, &conversation.id, contact_id.as_deref(), &record)
            .await?;

        if inserted {
            let unread_increment = i32::from(record.direction == Direction::Inbound);
            self.conversations
                .advance_after_insert(
                    &mut tx,
                    &conversation.id,
                    record.sent_at,
                    item.message.id,
                    unread_increment,
                )
                .await?;
        } else if item.source == SourceTag::EventEdit {
            self.messages
                .update_body_and_metadata(
                    &mut tx,
                    &conversation.id,
                    &record.external_message_id,
                    &record.body,
                    &record.metadata,
                )
                .await?;
        }
        tx.commit().await?;

        if inserted {
            let direction = record.direction.as_str();
            let preview: String = record.body.chars().take(40).collect();
            info!(source = item.source.as_str(), direction,
                  conversation = %conversation.title, %preview, "message stored");
        } else if item.source == SourceTag::EventEdit {
            debug!(conversation = %conversation.title,
                   message_id = item.message.id, "edit applied");
        }

        Ok(inserted)
    }

    /// Resolve a conversation for a read-state event without auto-creating.
    async fn lookup(&self, chat_id: i64) -> Result<Option<CachedConversation>> {
        let external_chat_id = chat_id.to_string();
        match self.cache.get(&external_chat_id) {
            CacheLookup::Found(conversation) => Ok(Some(conversation)),
            CacheLookup::KnownAbsent => Ok(None),
            CacheLookup::Uncached => {
                let fetched = self.conversations.find_by_external(&external_chat_id).await?;
                self.cache.put(external_chat_id, fetched.clone());
                Ok(fetched)
            }
        }
    }

    /// Apply an outbox read-ack observed on the event stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn handle_read_ack(&self, chat_id: i64, max_id: i64) -> Result<()> {
        let Some(conversation) = self.lookup(chat_id).await? else {
            return Ok(());
        };

        if self.conversations.apply_read_ack(&conversation.id, max_id).await? {
            info!(conversation = %conversation.title, max_id, "read-ack applied");
        }
        Ok(())
    }

    /// Apply a dialog unread-mark toggle observed on the event stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn handle_unread_mark(&self, chat_id: i64, unread: bool) -> Result<()> {
        let Some(conversation) = self.lookup(chat_id).await? else {
            return Ok(());
        };

        self.conversations
            .apply_unread_mark(&conversation.id, unread)
            .await?;
        info!(conversation = %conversation.title, unread, "unread mark applied");
        Ok(())
    }

    /// Apply a presence update observed on the event stream.
    ///
    /// Unknown users are a silent no-op; most presence traffic concerns
    /// users that are not contacts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn handle_presence(&self, user_id: i64, update: PresenceUpdate) -> Result<()> {
        let changed = self
            .contacts
            .update_presence(&user_id.to_string(), update.status, update.last_seen_at)
            .await?;
        if changed {
            debug!(user_id, status = update.status.as_str(), "presence updated");
        }
        Ok(())
    }
}
