//! Worker coordinator — wires the session, lock, pipeline, loops, and
//! event stream together for one listener incarnation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, HEARTBEAT_INTERVAL};
use crate::locking::LockManager;
use crate::models::listener_state::ListenerStatus;
use crate::models::lock::LockType;
use crate::persistence::contact_repo::ContactRepo;
use crate::persistence::conversation_repo::ConversationRepo;
use crate::persistence::db::Database;
use crate::persistence::outbox_repo::OutboxRepo;
use crate::persistence::state_repo::StateRepo;
use crate::telegram::api::{TelegramApi, TelegramError, TelegramEvent};
use crate::telegram::client::GrammersApi;
use crate::telegram::session::{spawn_session_persist_task, SessionManager};
use crate::{AppError, Result};

use super::catchup::CatchupLoops;
use super::discovery::Discovery;
use super::outbox::OutboxSender;
use super::processor::{ConversationCache, MessageProcessor};
use super::router::{IngestRouter, SourceTag};
use super::status::{WorkerStatus, PERSISTED_ERRORS};

/// Consecutive event-stream failures tolerated before the worker restarts.
const MAX_STREAM_FAILURES: u32 = 5;

/// Deadline for the in-worker cleanup sequence.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared slot holding the live upstream client.
///
/// The HTTP surface reads it for media downloads; empty means the client
/// is not ready (worker connecting or between restarts).
#[derive(Default)]
pub struct ApiSlot(RwLock<Option<Arc<dyn TelegramApi>>>);

impl ApiSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current client, when connected.
    pub async fn get(&self) -> Option<Arc<dyn TelegramApi>> {
        self.0.read().await.clone()
    }

    /// Install a connected client.
    pub async fn set(&self, api: Arc<dyn TelegramApi>) {
        *self.0.write().await = Some(api);
    }

    /// Drop the client (worker stopping or restarting).
    pub async fn clear(&self) {
        *self.0.write().await = None;
    }
}

/// One listener incarnation. The restart loop in `main` builds a fresh
/// worker per attempt.
pub struct SyncWorker {
    config: Arc<Config>,
    db: Arc<Database>,
    status: Arc<WorkerStatus>,
    session: Arc<SessionManager>,
    api_slot: Arc<ApiSlot>,
}

impl SyncWorker {
    /// Wire up a worker over shared process state.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        status: Arc<WorkerStatus>,
        session: Arc<SessionManager>,
        api_slot: Arc<ApiSlot>,
    ) -> Self {
        Self {
            config,
            db,
            status,
            session,
            api_slot,
        }
    }

    /// Run the listener until shutdown or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockContested` when another listener is alive,
    /// `AppError::Telegram` when the event stream degrades beyond repair,
    /// or any store error the pipeline cannot absorb. The caller decides
    /// whether to restart.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let locks = Arc::new(LockManager::new(Arc::clone(&self.db)));
        let state = StateRepo::new(
            Arc::clone(&self.db),
            locks.process_id().to_string(),
            locks.hostname().to_string(),
        );

        if !locks.acquire(LockType::Listener, "singleton", None).await? {
            let holder = locks.check(LockType::Listener, "singleton", true).await?;
            if let Some(holder) = holder {
                return Err(AppError::LockContested(format!(
                    "another listener is running on {} (pid {})",
                    holder.hostname, holder.process_id
                )));
            }
            // The contender was dead and has been reaped; try once more.
            if !locks.acquire(LockType::Listener, "singleton", None).await? {
                return Err(AppError::LockContested("listener lock still contested".into()));
            }
        }
        info!("acquired listener lock");

        self.status.set_status(ListenerStatus::Starting);
        self.persist_state(&state, ListenerStatus::Starting).await;

        let result = self.run_locked(&locks, &state, cancel).await;

        // Cleanup runs on every exit path, bounded by the graceful
        // shutdown deadline. A missed release is reclaimed by lease expiry.
        let final_status = if result.is_ok() {
            ListenerStatus::Stopped
        } else {
            ListenerStatus::Error
        };
        let cleanup = async {
            self.api_slot.clear().await;
            self.persist_state(&state, final_status).await;
            match locks.release_all().await {
                Ok(released) => info!(released, "released locks"),
                Err(err) => warn!(%err, "lock release failed"),
            }
        };
        if tokio::time::timeout(CLEANUP_TIMEOUT, cleanup).await.is_err() {
            warn!("worker cleanup timed out; lease will expire on its own");
        }

        result
    }

    #[allow(clippy::too_many_lines)] // Pipeline wiring is inherently sequential.
    async fn run_locked(
        &self,
        locks: &Arc<LockManager>,
        state: &StateRepo,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("connecting to telegram");
        let api: Arc<dyn TelegramApi> = Arc::new(GrammersApi::connect(&self.config).await?);
        self.api_slot.set(Arc::clone(&api)).await;

        // Pipeline wiring: many producers, one bounded FIFO, one consumer.
        let (router, rx, recent) = IngestRouter::new();
        let cache = Arc::new(ConversationCache::new());
        let conversations = ConversationRepo::new(Arc::clone(&self.db));
        let contacts = ContactRepo::new(Arc::clone(&self.db));

        let discovery = Arc::new(Discovery::new(
            Arc::clone(&api),
            conversations.clone(),
            contacts,
            Arc::clone(&cache),
            router.clone(),
            Arc::clone(&self.status),
        ));
        let processor = Arc::new(MessageProcessor::new(
            Arc::clone(&self.db),
            state.clone(),
            Arc::clone(&discovery),
            cache,
            recent,
            Arc::clone(&self.status),
        ));
        let catchup = Arc::new(CatchupLoops::new(
            Arc::clone(&api),
            conversations.clone(),
            router.clone(),
            Arc::clone(&self.status),
        ));
        let outbox = Arc::new(OutboxSender::new(
            Arc::clone(&api),
            OutboxRepo::new(Arc::clone(&self.db)),
            conversations,
            locks.process_id().to_string(),
        ));

        let run_ct = cancel.child_token();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        // The single consumer. Never spawned twice.
        handles.push({
            let processor = Arc::clone(&processor);
            let ct = run_ct.clone();
            tokio::spawn(async move { processor.run(rx, ct).await })
        });

        self.status.set_status(ListenerStatus::Running);
        self.persist_state(state, ListenerStatus::Running).await;
        info!("listener running");

        // Converge before the periodic loops start racing ahead.
        if let Err(err) = catchup.startup_catch_up(&run_ct).await {
            self.status.record_error(format!("startup catch-up: {err}"));
            warn!(%err, "startup catch-up failed");
        }
        discovery.sync_empty_conversations(&run_ct).await;

        handles.push(self.spawn_heartbeat(Arc::clone(locks), state.clone(), run_ct.clone()));
        handles.push({
            let discovery = Arc::clone(&discovery);
            let interval = self.config.dialog_discovery_interval;
            let limit = self.config.dialog_discovery_limit;
            let ct = run_ct.clone();
            tokio::spawn(async move { discovery.run_loop(interval, limit, ct).await })
        });
        handles.push({
            let catchup = Arc::clone(&catchup);
            let interval = self.config.active_poll_interval;
            let ct = run_ct.clone();
            tokio::spawn(async move { catchup.active_poll_loop(interval, ct).await })
        });
        handles.push({
            let catchup = Arc::clone(&catchup);
            let interval = self.config.full_catchup_interval;
            let ct = run_ct.clone();
            tokio::spawn(async move { catchup.full_catchup_loop(interval, ct).await })
        });
        handles.push({
            let outbox = Arc::clone(&outbox);
            let ct = run_ct.clone();
            tokio::spawn(async move { outbox.run(ct).await })
        });
        handles.push(spawn_session_persist_task(
            Arc::clone(&self.session),
            Arc::clone(&api),
            run_ct.clone(),
        ));

        let result = self.event_loop(&api, &router, &processor, &run_ct).await;

        run_ct.cancel();
        for handle in handles {
            let _ = handle.await;
        }

        result
    }

    /// Consume the realtime event stream until cancellation or a fatal
    /// failure streak.
    async fn event_loop(
        &self,
        api: &Arc<dyn TelegramApi>,
        router: &IngestRouter,
        processor: &Arc<MessageProcessor>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut failures = 0_u32;

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                event = api.next_event() => event,
            };

            match event {
                Ok(event) => {
                    failures = 0;
                    self.dispatch_event(event, router, processor).await;
                }
                Err(TelegramError::FloodWait(secs)) => {
                    warn!(secs, "event stream flood-waited");
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                Err(err) => {
                    failures += 1;
                    self.status.record_error(format!("event stream: {err}"));
                    error!(%err, failures, "event stream error");
                    if failures >= MAX_STREAM_FAILURES {
                        break Err(err.into());
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn dispatch_event(
        &self,
        event: TelegramEvent,
        router: &IngestRouter,
        processor: &Arc<MessageProcessor>,
    ) {
        match event {
            TelegramEvent::NewMessage(message) => {
                router.enqueue(message, SourceTag::Event).await;
            }
            TelegramEvent::EditedMessage(message) => {
                router.enqueue(message, SourceTag::EventEdit).await;
            }
            TelegramEvent::ReadOutbox { chat_id, max_id } => {
                if let Err(err) = processor.handle_read_ack(chat_id, max_id).await {
                    warn!(chat_id, max_id, %err, "read-ack handling failed");
                }
            }
            TelegramEvent::UnreadMark { chat_id, unread } => {
                if let Err(err) = processor.handle_unread_mark(chat_id, unread).await {
                    warn!(chat_id, unread, %err, "unread-mark handling failed");
                }
            }
            TelegramEvent::Presence { user_id, update } => {
                if let Err(err) = processor.handle_presence(user_id, update).await {
                    debug!(user_id, %err, "presence handling failed");
                }
            }
            TelegramEvent::Ignored => {}
        }
    }

    fn spawn_heartbeat(
        &self,
        locks: Arc<LockManager>,
        state: StateRepo,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let status = Arc::clone(&self.status);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await; // First tick fires immediately; skip it.
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("heartbeat loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {}
                }

                if let Err(err) = locks.heartbeat().await {
                    status.record_error(format!("lock heartbeat: {err}"));
                    warn!(%err, "lock heartbeat failed");
                }
                let errors = status.recent_errors(PERSISTED_ERRORS);
                if let Err(err) = state
                    .update_state(ListenerStatus::Running, status.messages_received(), &errors)
                    .await
                {
                    warn!(%err, "listener state heartbeat failed");
                }
                status.touch_heartbeat();
            }
        })
    }

    async fn persist_state(&self, state: &StateRepo, status: ListenerStatus) {
        let errors = self.status.recent_errors(PERSISTED_ERRORS);
        if let Err(err) = state
            .update_state(status, self.status.messages_received(), &errors)
            .await
        {
            warn!(%err, status = status.as_str(), "failed to persist listener state");
        }
    }
}
