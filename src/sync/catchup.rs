//! Catch-up producers — the convergence side of the pipeline.
//!
//! The realtime event stream is an optimization; these loops are the
//! correctness mechanism. The startup catch-up covers the downtime gap,
//! the active poll re-checks the busiest conversations every couple of
//! minutes, and the full catch-up sweeps the stalest conversations so
//! nothing is ever left behind.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{
    ACTIVE_POLL_CONVERSATIONS, CATCH_UP_CONVERSATIONS, CATCH_UP_LIMIT,
    FULL_CATCHUP_CONVERSATIONS, POLL_MESSAGES_PER_CONVERSATION, UPSTREAM_PACING,
};
use crate::persistence::conversation_repo::{ConversationRepo, SyncCursor};
use crate::telegram::api::{TelegramApi, TelegramError};
use crate::Result;

use super::router::{IngestRouter, SourceTag};
use super::status::WorkerStatus;

/// Delay before the first active poll, letting startup catch-up finish.
const ACTIVE_POLL_OFFSET: Duration = Duration::from_secs(60);

/// Delay before the first full catch-up.
const FULL_CATCHUP_OFFSET: Duration = Duration::from_secs(180);

/// The three checkpoint-driven producers.
pub struct CatchupLoops {
    api: Arc<dyn TelegramApi>,
    conversations: ConversationRepo,
    router: IngestRouter,
    status: Arc<WorkerStatus>,
}

impl CatchupLoops {
    /// Wire up the catch-up producers.
    #[must_use]
    pub fn new(
        api: Arc<dyn TelegramApi>,
        conversations: ConversationRepo,
        router: IngestRouter,
        status: Arc<WorkerStatus>,
    ) -> Self {
        Self {
            api,
            conversations,
            router,
            status,
        }
    }

    /// One-shot catch-up at process start: the most recently active
    /// conversations, with a deep per-conversation cap.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the cursor scan fails; per-conversation
    /// upstream errors are absorbed.
    pub async fn startup_catch_up(&self, cancel: &CancellationToken) -> Result<()> {
        info!("running startup catch-up");
        let cursors = self.conversations.most_active(CATCH_UP_CONVERSATIONS).await?;
        let queued = self
            .sweep(&cursors, CATCH_UP_LIMIT, SourceTag::Startup, cancel)
            .await;
        info!(conversations = cursors.len(), queued, "startup catch-up complete");
        Ok(())
    }

    /// Active polling backup over the busiest conversations.
    pub async fn active_poll_loop(&self, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "active poll loop started");

        let mut first_run = true;
        loop {
            let wait = if first_run { ACTIVE_POLL_OFFSET } else { interval };
            first_run = false;

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            match self.conversations.most_active(ACTIVE_POLL_CONVERSATIONS).await {
                Ok(cursors) => {
                    let queued = self
                        .sweep(&cursors, POLL_MESSAGES_PER_CONVERSATION, SourceTag::Poll, &cancel)
                        .await;
                    info!(checked = cursors.len(), queued, "active poll complete");
                }
                Err(err) => {
                    self.status.record_error(format!("active poll: {err}"));
                    warn!(%err, "active poll scan failed");
                }
            }
        }

        info!("active poll loop stopped");
    }

    /// Full catch-up over the stalest conversations, so low-activity chats
    /// still converge.
    pub async fn full_catchup_loop(&self, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "full catch-up loop started");

        let mut first_run = true;
        loop {
            let wait = if first_run { FULL_CATCHUP_OFFSET } else { interval };
            first_run = false;

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            match self.conversations.stalest(FULL_CATCHUP_CONVERSATIONS).await {
                Ok(cursors) => {
                    let queued = self
                        .sweep(
                            &cursors,
                            POLL_MESSAGES_PER_CONVERSATION,
                            SourceTag::Catchup,
                            &cancel,
                        )
                        .await;
                    info!(checked = cursors.len(), queued, "full catch-up complete");
                }
                Err(err) => {
                    self.status.record_error(format!("full catch-up: {err}"));
                    warn!(%err, "full catch-up scan failed");
                }
            }
        }

        info!("full catch-up loop stopped");
    }

    /// Fetch past-checkpoint messages for each cursor and enqueue them.
    ///
    /// A flood-wait sleeps the mandated duration and retries the same
    /// conversation without advancing; access-denied conversations are
    /// skipped. Neither is fatal to the sweep.
    async fn sweep(
        &self,
        cursors: &[SyncCursor],
        per_conversation: usize,
        tag: SourceTag,
        cancel: &CancellationToken,
    ) -> usize {
        let mut queued = 0_usize;
        let mut index = 0_usize;

        while index < cursors.len() {
            if cancel.is_cancelled() {
                break;
            }
            let cursor = &cursors[index];

            let Ok(chat_id) = cursor.external_chat_id.parse::<i64>() else {
                index += 1;
                continue;
            };

            match self
                .api
                .recent_messages(chat_id, cursor.min_id(), per_conversation)
                .await
            {
                Ok(messages) => {
                    let mut found = 0_usize;
                    for message in messages {
                        if self.router.enqueue(message, tag).await {
                            found += 1;
                        }
                    }
                    if found > 0 {
                        debug!(title = %cursor.title, found, tag = tag.as_str(),
                               "messages queued");
                        queued += found;
                    }
                }
                Err(TelegramError::FloodWait(secs)) => {
                    warn!(secs, title = %cursor.title, "flood wait; retrying conversation");
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    continue; // Same cursor, checkpoint untouched.
                }
                Err(TelegramError::AccessDenied(msg)) => {
                    debug!(title = %cursor.title, %msg, "conversation inaccessible; skipped");
                }
                Err(err) => {
                    warn!(title = %cursor.title, %err, "poll failed for conversation");
                }
            }

            index += 1;
            tokio::time::sleep(UPSTREAM_PACING).await;
        }

        queued
    }
}
