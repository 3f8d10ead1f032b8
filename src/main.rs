#![forbid(unsafe_code)]

//! `telegram-syncd` — Telegram-to-CRM sync worker binary.
//!
//! Bootstraps configuration, restores the session blob, starts the HTTP
//! health surface, and supervises the listener with a bounded restart
//! policy.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use telegram_syncd::config::Config;
use telegram_syncd::http::server::{serve, HttpState};
use telegram_syncd::models::listener_state::ListenerStatus;
use telegram_syncd::persistence::db;
use telegram_syncd::persistence::worker_session_repo::WorkerSessionRepo;
use telegram_syncd::sync::status::WorkerStatus;
use telegram_syncd::sync::worker::{ApiSlot, SyncWorker};
use telegram_syncd::telegram::session::SessionManager;
use telegram_syncd::{AppError, Result};

/// Maximum listener restarts before giving up.
const MAX_RESTARTS: u32 = 10;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "telegram-syncd", about = "Telegram-to-CRM sync worker", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("telegram-syncd bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run())
}

async fn run() -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = Arc::new(Config::from_env()?);
    info!("configuration loaded");

    // ── Initialize store ────────────────────────────────
    let database = Arc::new(db::connect(&config.database_url).await?);
    info!("database connected");

    // ── Restore session (file → store → env seed) ───────
    let session = Arc::new(SessionManager::new(
        &config,
        WorkerSessionRepo::new(Arc::clone(&database)),
    ));
    let source = session.ensure_local_session().await.map_err(|err| {
        error!(%err, "no usable telegram session; exiting");
        err
    })?;
    info!(?source, "session ready");

    // ── Shared process state ────────────────────────────
    let status = Arc::new(WorkerStatus::new());
    let api_slot = Arc::new(ApiSlot::new());
    let ct = CancellationToken::new();

    // ── Signal handling ─────────────────────────────────
    {
        let ct = ct.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received — starting graceful shutdown");
            ct.cancel();

            // A second signal force-exits.
            tokio::spawn(async {
                shutdown_signal().await;
                error!("second shutdown signal received — forcing exit");
                std::process::exit(1);
            });
        });
    }

    // ── HTTP surface (up before the listener, for the supervisor) ──
    let http_state = Arc::new(HttpState {
        status: Arc::clone(&status),
        session: Arc::clone(&session),
        api_slot: Arc::clone(&api_slot),
    });
    let http_handle = {
        let ct = ct.clone();
        let port = config.http_port;
        tokio::spawn(async move {
            if let Err(err) = serve(http_state, port, ct).await {
                error!(%err, "http surface failed");
            }
        })
    };

    // ── Listener with restart policy ────────────────────
    let result = supervise(&config, &database, &status, &session, &api_slot, &ct).await;

    ct.cancel();
    let _ = http_handle.await;

    match &result {
        Ok(()) => info!("telegram-syncd shut down"),
        Err(err) => error!(%err, "telegram-syncd exiting with failure"),
    }
    result
}

/// Restart the listener up to [`MAX_RESTARTS`] times with linear backoff
/// capped at 30 seconds. Exhaustion exits nonzero so the outer supervisor
/// replaces the process.
async fn supervise(
    config: &Arc<Config>,
    database: &Arc<db::Database>,
    status: &Arc<WorkerStatus>,
    session: &Arc<SessionManager>,
    api_slot: &Arc<ApiSlot>,
    ct: &CancellationToken,
) -> Result<()> {
    let mut attempt = 0_u32;

    loop {
        if ct.is_cancelled() {
            status.set_status(ListenerStatus::Stopped);
            return Ok(());
        }

        let worker = SyncWorker::new(
            Arc::clone(config),
            Arc::clone(database),
            Arc::clone(status),
            Arc::clone(session),
            Arc::clone(api_slot),
        );

        match worker.run(ct.clone()).await {
            Ok(()) => {
                status.set_status(ListenerStatus::Stopped);
                return Ok(());
            }
            Err(err) => {
                attempt += 1;
                status.record_error(format!("listener attempt {attempt}: {err}"));

                if attempt >= MAX_RESTARTS {
                    status.set_status(ListenerStatus::Failed);
                    error!(attempt, %err, "restart budget exhausted");
                    return Err(AppError::Telegram(format!(
                        "listener failed after {attempt} attempts: {err}"
                    )));
                }

                let backoff = std::time::Duration::from_secs(u64::from((5 * attempt).min(30)));
                status.set_status(ListenerStatus::Restarting);
                warn!(attempt, backoff_secs = backoff.as_secs(), %err,
                      "listener crashed; restarting");

                tokio::select! {
                    () = ct.cancelled() => {
                        status.set_status(ListenerStatus::Stopped);
                        return Ok(());
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
