//! Dialog discovery — creates conversations for chats the pipeline has
//! never seen, reconciles unread/presence state for the ones it has, and
//! heals conversations that were created but never seeded.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EMPTY_CONVERSATION_SCAN_LIMIT, INITIAL_SEED_LIMIT, UPSTREAM_PACING};
use crate::models::conversation::{conversation_id, CachedConversation, ChatKind};
use crate::persistence::contact_repo::ContactRepo;
use crate::persistence::conversation_repo::ConversationRepo;
use crate::telegram::api::{DialogSnapshot, TelegramApi};
use crate::{AppError, Result};

use super::processor::{CacheLookup, ConversationCache};
use super::router::{IngestRouter, SourceTag};
use super::status::WorkerStatus;

/// Delay before the first discovery scan after startup.
const FIRST_RUN_OFFSET: Duration = Duration::from_secs(30);

/// Outcome counters for one discovery scan, for the completion log line.
#[derive(Debug, Default)]
struct ScanStats {
    scanned: usize,
    created: usize,
    known: usize,
    reconciled: usize,
    errors: usize,
}

/// Discovery service shared by the loop and the processor's auto-create
/// path.
pub struct Discovery {
    api: Arc<dyn TelegramApi>,
    conversations: ConversationRepo,
    contacts: ContactRepo,
    cache: Arc<ConversationCache>,
    router: IngestRouter,
    status: Arc<WorkerStatus>,
}

impl Discovery {
    /// Wire up the discovery service.
    #[must_use]
    pub fn new(
        api: Arc<dyn TelegramApi>,
        conversations: ConversationRepo,
        contacts: ContactRepo,
        cache: Arc<ConversationCache>,
        router: IngestRouter,
        status: Arc<WorkerStatus>,
    ) -> Self {
        Self {
            api,
            conversations,
            contacts,
            cache,
            router,
            status,
        }
    }

    /// Create a conversation for a chat, fetching its upstream profile.
    ///
    /// Falls back to a placeholder title when the profile fetch fails, so
    /// a message from a barely reachable chat still lands somewhere. For
    /// private chats the peer's contact row is ensured as well.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the conversation upsert fails.
    pub async fn create_from_chat(&self, chat_id: i64) -> Result<CachedConversation> {
        let (title, kind, username) = match self.api.chat_profile(chat_id).await {
            Ok(profile) => (profile.title, profile.kind, profile.username),
            Err(err) => {
                warn!(chat_id, %err, "profile fetch failed; creating with placeholder");
                self.status
                    .record_error(format!("entity fetch for {chat_id}: {err}"));
                (format!("Chat {chat_id}"), ChatKind::Private, None)
            }
        };

        let conversation = self
            .conversations
            .create(&conversation_id(chat_id), &chat_id.to_string(), &title, kind)
            .await?;

        if kind == ChatKind::Private {
            if let Err(err) = self
                .contacts
                .ensure_contact(&chat_id.to_string(), &title, username.as_deref())
                .await
            {
                warn!(chat_id, %err, "contact ensure failed");
            }
        }

        self.cache
            .put(chat_id.to_string(), Some(conversation.clone()));
        info!(chat_id, title = %conversation.title, kind = kind.as_str(),
              "conversation created");
        Ok(conversation)
    }

    /// Seed a conversation by enqueuing its most recent messages.
    ///
    /// Returns how many messages entered the queue.
    ///
    /// # Errors
    ///
    /// Returns the upstream error when the history fetch fails.
    pub async fn seed_conversation(&self, chat_id: i64) -> Result<usize> {
        let messages = self
            .api
            .recent_messages(chat_id, 0, INITIAL_SEED_LIMIT)
            .await
            .map_err(AppError::from)?;

        let mut queued = 0;
        for message in messages {
            if self.router.enqueue(message, SourceTag::Seed).await {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Heal conversations that exist with zero messages.
    ///
    /// Runs once at startup; these are rows a previous run discovered but
    /// never managed to seed.
    pub async fn sync_empty_conversations(&self, cancel: &CancellationToken) {
        let empties = match self
            .conversations
            .empty_conversations(EMPTY_CONVERSATION_SCAN_LIMIT)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(%err, "empty-conversation scan failed");
                return;
            }
        };

        if empties.is_empty() {
            info!("no empty conversations to heal");
            return;
        }

        info!(count = empties.len(), "healing empty conversations");
        let mut healed = 0_usize;

        for cursor in &empties {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(chat_id) = cursor.external_chat_id.parse::<i64>() else {
                continue;
            };

            match self.seed_conversation(chat_id).await {
                Ok(queued) if queued > 0 => {
                    healed += 1;
                    info!(title = %cursor.title, queued, "seeded empty conversation");
                }
                Ok(_) => debug!(title = %cursor.title, "no upstream messages to seed"),
                Err(AppError::FloodWait(secs)) => {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                Err(err) => warn!(title = %cursor.title, %err, "seeding failed"),
            }

            tokio::time::sleep(UPSTREAM_PACING).await;
        }

        info!(healed, total = empties.len(), "empty-conversation heal complete");
    }

    /// Periodic discovery loop. First run is offset shortly after startup.
    pub async fn run_loop(&self, interval: Duration, limit: usize, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), limit, "dialog discovery loop started");

        let mut first_run = true;
        loop {
            let wait = if first_run { FIRST_RUN_OFFSET } else { interval };
            first_run = false;

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            match self.scan(limit, &cancel).await {
                Ok(stats) => info!(
                    scanned = stats.scanned,
                    created = stats.created,
                    known = stats.known,
                    reconciled = stats.reconciled,
                    errors = stats.errors,
                    "dialog discovery complete"
                ),
                Err(AppError::FloodWait(secs)) => {
                    warn!(secs, "discovery flood-waited");
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                Err(err) => {
                    self.status.record_error(format!("dialog discovery: {err}"));
                    warn!(%err, "dialog discovery failed");
                }
            }
        }

        info!("dialog discovery loop stopped");
    }

    async fn scan(&self, limit: usize, cancel: &CancellationToken) -> Result<ScanStats> {
        let dialogs = self.api.dialogs(limit).await.map_err(AppError::from)?;
        let mut stats = ScanStats {
            scanned: dialogs.len(),
            ..ScanStats::default()
        };

        for dialog in dialogs {
            if cancel.is_cancelled() {
                break;
            }

            match self.visit_dialog(&dialog).await {
                Ok(visit) => match visit {
                    Visit::Created => stats.created += 1,
                    Visit::Known { reconciled } => {
                        stats.known += 1;
                        if reconciled {
                            stats.reconciled += 1;
                        }
                    }
                },
                Err(AppError::FloodWait(secs)) => {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    stats.errors += 1;
                }
                Err(AppError::AccessDenied(msg)) => {
                    debug!(chat_id = dialog.chat_id, %msg, "dialog inaccessible; skipped");
                    stats.errors += 1;
                }
                Err(err) => {
                    warn!(chat_id = dialog.chat_id, %err, "dialog visit failed");
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn visit_dialog(&self, dialog: &DialogSnapshot) -> Result<Visit> {
        let external_chat_id = dialog.chat_id.to_string();

        let known = match self.cache.get(&external_chat_id) {
            CacheLookup::Found(conversation) => Some(conversation),
            CacheLookup::KnownAbsent => None,
            CacheLookup::Uncached => {
                let fetched = self.conversations.find_by_external(&external_chat_id).await?;
                self.cache.put(external_chat_id.clone(), fetched.clone());
                fetched
            }
        };

        if let Some(conversation) = known {
            let reconciled = self
                .conversations
                .reconcile_dialog_state(
                    &conversation.id,
                    dialog.unread_count,
                    dialog.read_inbox_max_id,
                )
                .await?;

            if let Some(presence) = dialog.presence {
                if conversation.kind == ChatKind::Private {
                    let _ = self
                        .contacts
                        .update_presence(
                            &external_chat_id,
                            presence.status,
                            presence.last_seen_at,
                        )
                        .await;
                }
            }

            return Ok(Visit::Known { reconciled });
        }

        self.create_from_chat(dialog.chat_id).await?;

        match self.seed_conversation(dialog.chat_id).await {
            Ok(queued) => debug!(chat_id = dialog.chat_id, queued, "seeded new conversation"),
            Err(AppError::FloodWait(secs)) => {
                return Err(AppError::FloodWait(secs));
            }
            Err(err) => warn!(chat_id = dialog.chat_id, %err, "initial seed failed"),
        }

        tokio::time::sleep(UPSTREAM_PACING).await;
        Ok(Visit::Created)
    }
}

enum Visit {
    Created,
    Known { reconciled: bool },
}
