//! Outbox sender — drains queued outbound messages into Telegram.
//!
//! Polls fast for an instant-send feel. The claim is one atomic statement,
//! so any number of senders across processes dispatch each row at most
//! once; results and retry accounting land back on the row.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::outbox::{AttachmentKind, ClaimedOutboxMessage};
use crate::persistence::conversation_repo::ConversationRepo;
use crate::persistence::outbox_repo::OutboxRepo;
use crate::telegram::api::{OutboundFile, TelegramApi};
use crate::{AppError, Result};

/// Poll period for pending rows.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Map a stored attachment kind string to its dispatch path.
///
/// `None` means a plain text send; an unrecognized kind falls back to the
/// document path rather than failing the row.
#[must_use]
pub fn resolve_attachment_kind(raw: Option<&str>) -> Option<AttachmentKind> {
    raw.map(|kind| AttachmentKind::parse(kind).unwrap_or(AttachmentKind::Document))
}

/// Background sender for the outgoing-message queue.
pub struct OutboxSender {
    api: Arc<dyn TelegramApi>,
    outbox: OutboxRepo,
    conversations: ConversationRepo,
    process_id: String,
}

impl OutboxSender {
    /// Wire up the sender.
    #[must_use]
    pub fn new(
        api: Arc<dyn TelegramApi>,
        outbox: OutboxRepo,
        conversations: ConversationRepo,
        process_id: String,
    ) -> Self {
        Self {
            api,
            outbox,
            conversations,
            process_id,
        }
    }

    /// Poll and dispatch until cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("outbox sender started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let claimed = match self.outbox.claim_next(&self.process_id).await {
                Ok(row) => row,
                Err(err) => {
                    error!(%err, "outbox claim failed");
                    continue;
                }
            };

            if let Some(message) = claimed {
                self.send_claimed(message).await;
            }
        }

        info!("outbox sender stopped");
    }

    /// Dispatch one claimed row and record the outcome.
    async fn send_claimed(&self, message: ClaimedOutboxMessage) {
        let id = message.id.clone();
        let retry_count = message.retry_count;
        let max_retries = message.max_retries;

        match self.dispatch(&message).await {
            Ok(sent_message_id) => {
                info!(outbox_id = %id, sent_message_id, "outbox message sent");
                if let Err(err) = self.outbox.mark_sent(&id, &sent_message_id.to_string()).await {
                    error!(outbox_id = %id, %err, "failed to record sent outbox message");
                }
            }
            Err(err) => {
                warn!(outbox_id = %id, %err, retry_count, "outbox send failed");
                if let Err(record_err) = self
                    .outbox
                    .mark_failed(&id, retry_count, max_retries, &err.to_string())
                    .await
                {
                    error!(outbox_id = %id, %record_err, "failed to record outbox failure");
                }
            }
        }
    }

    /// Send one row upstream per the dispatch matrix. Returns the new
    /// external message id.
    async fn dispatch(&self, message: &ClaimedOutboxMessage) -> Result<i64> {
        let (external_chat_id, title) = self
            .conversations
            .send_target(&message.conversation_id)
            .await?
            .ok_or_else(|| {
                AppError::Outbox(format!("conversation {} not found", message.conversation_id))
            })?;

        let chat_id: i64 = external_chat_id
            .parse()
            .map_err(|_| AppError::Outbox(format!("invalid chat id for {title}")))?;

        let reply_to = message
            .reply_to_message_id
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok());

        let Some(kind) = resolve_attachment_kind(message.attachment_kind.as_deref()) else {
            let text = message
                .text
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AppError::Outbox("text message with empty body".into()))?;
            let sent = self.api.send_text(chat_id, text, reply_to).await?;
            return Ok(sent);
        };

        let storage_key = message
            .attachment_key
            .as_deref()
            .ok_or_else(|| AppError::Outbox("attachment without storage key".into()))?;

        // A fetch failure is a send failure, attributed to this row.
        let (bytes, stored_name, stored_mime) = self
            .outbox
            .fetch_attachment(storage_key)
            .await?
            .ok_or_else(|| AppError::Outbox(format!("attachment {storage_key} not found")))?;

        let caption = message
            .attachment_caption
            .clone()
            .or_else(|| message.text.clone())
            .filter(|c| !c.is_empty());

        let file = OutboundFile {
            kind,
            bytes,
            name: message
                .attachment_name
                .clone()
                .or(stored_name)
                .unwrap_or_else(|| "file".to_string()),
            mime: message.attachment_mime.clone().or(stored_mime),
        };

        let sent = self
            .api
            .send_file(chat_id, file, caption.as_deref(), reply_to)
            .await?;
        Ok(sent)
    }
}
