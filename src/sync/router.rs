//! Ingestion router — the single enqueue entry point for every message
//! producer.
//!
//! Realtime events, the active poll, the full catch-up, the startup
//! catch-up, and discovery seeding all feed the same bounded FIFO. A
//! process-local recent-set drops duplicate sightings before they reach
//! the queue; the database's unique key catches whatever slips through.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::telegram::api::UpstreamMessage;

/// Queue capacity between producers and the processor.
const QUEUE_CAPACITY: usize = 1024;

/// Recent-set hard bound.
const RECENT_SET_MAX: usize = 10_000;

/// Entries kept after an overflow truncation, newest by insertion order.
const RECENT_SET_KEEP: usize = 5_000;

/// Which producer enqueued a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    /// Realtime new-message event.
    Event,
    /// Realtime edited-message event.
    EventEdit,
    /// Active poll over the most recently active conversations.
    Poll,
    /// Periodic full catch-up over the stalest conversations.
    Catchup,
    /// One-shot catch-up at process start.
    Startup,
    /// Seeding of a newly discovered conversation.
    Seed,
}

impl SourceTag {
    /// Tag string for log lines.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::EventEdit => "event_edit",
            Self::Poll => "poll",
            Self::Catchup => "catchup",
            Self::Startup => "startup",
            Self::Seed => "seed",
        }
    }
}

/// One unit of work for the processor.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Normalized upstream message.
    pub message: UpstreamMessage,
    /// Producer that enqueued it.
    pub source: SourceTag,
}

impl QueueItem {
    /// Deduplication key: `(chat_id, external_message_id)`.
    #[must_use]
    pub fn dedup_key(&self) -> (i64, i64) {
        (self.message.chat_id, self.message.id)
    }
}

/// Insertion-ordered set of recently processed dedup keys.
///
/// Bounded at [`RECENT_SET_MAX`]; overflow truncates to the newest
/// [`RECENT_SET_KEEP`] entries by insertion order.
#[derive(Debug, Default)]
pub struct RecentSet {
    seen: HashSet<(i64, i64)>,
    order: VecDeque<(i64, i64)>,
}

impl RecentSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key was recently recorded.
    #[must_use]
    pub fn contains(&self, key: (i64, i64)) -> bool {
        self.seen.contains(&key)
    }

    /// Record a key, truncating on overflow.
    pub fn insert(&mut self, key: (i64, i64)) {
        if !self.seen.insert(key) {
            return;
        }
        self.order.push_back(key);

        if self.order.len() > RECENT_SET_MAX {
            while self.order.len() > RECENT_SET_KEEP {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
    }

    /// Number of keys currently recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Fan-in router shared by all producers.
#[derive(Clone)]
pub struct IngestRouter {
    tx: mpsc::Sender<QueueItem>,
    recent: Arc<Mutex<RecentSet>>,
}

impl IngestRouter {
    /// Build the router, its consumer end, and the shared recent-set.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<QueueItem>, Arc<Mutex<RecentSet>>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let recent = Arc::new(Mutex::new(RecentSet::new()));
        (
            Self {
                tx,
                recent: Arc::clone(&recent),
            },
            rx,
            recent,
        )
    }

    /// Enqueue a message descriptor for processing.
    ///
    /// Returns whether the message entered the queue; malformed messages
    /// and recently seen keys are dropped.
    pub async fn enqueue(&self, message: UpstreamMessage, source: SourceTag) -> bool {
        if message.id <= 0 || message.chat_id == 0 {
            return false;
        }

        // Edits must reach the processor even when the original message
        // was just ingested, so only new-message producers dedup here.
        if source != SourceTag::EventEdit {
            let key = (message.chat_id, message.id);
            let Ok(recent) = self.recent.lock() else {
                return false;
            };
            if recent.contains(key) {
                return false;
            }
        }

        let item = QueueItem { message, source };
        if self.tx.send(item).await.is_err() {
            debug!(source = source.as_str(), "processor queue closed; dropping message");
            return false;
        }
        true
    }
}
