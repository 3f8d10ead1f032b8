//! Session manager — makes an authenticated session file available on
//! local storage before the client connects, and keeps the store copy and
//! rolling local backups fresh afterwards.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::persistence::worker_session_repo::WorkerSessionRepo;
use crate::telegram::api::TelegramApi;
use crate::{AppError, Result};

/// How often the live session is persisted back to the store.
const PERSIST_INTERVAL: Duration = Duration::from_secs(3600);

/// Rolling local backups retained.
const BACKUP_RETENTION: usize = 5;

/// Where the session bytes were restored from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    /// A non-empty session file was already on local storage.
    LocalFile,
    /// Restored from the `worker_session` store row.
    Database,
    /// Restored from the `TELEGRAM_SESSION_BASE64` seed.
    Environment,
}

/// Session file facts surfaced by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Whether the session file exists.
    pub exists: bool,
    /// Absolute path of the session file.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time, RFC 3339.
    pub modified: Option<String>,
    /// Number of rolling backups on disk.
    pub backups: usize,
}

/// Manages the on-disk session blob and its store/backup copies.
pub struct SessionManager {
    session_file: PathBuf,
    backup_dir: PathBuf,
    session_base64: Option<String>,
    repo: WorkerSessionRepo,
}

impl SessionManager {
    /// Create a manager for the configured session path.
    #[must_use]
    pub fn new(config: &Config, repo: WorkerSessionRepo) -> Self {
        let session_file = config.session_path.with_extension("session");
        let backup_dir = config
            .session_path
            .parent()
            .map_or_else(|| PathBuf::from("backups"), |p| p.join("backups"));

        Self {
            session_file,
            backup_dir,
            session_base64: config.session_base64.clone(),
            repo,
        }
    }

    /// Ensure a session file exists locally, restoring it if necessary.
    ///
    /// Resolution order, first success wins: local file, store row,
    /// base64 environment seed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionUnavailable` when every source is empty,
    /// or `AppError::Io`/`AppError::Db` on restore failures.
    pub async fn ensure_local_session(&self) -> Result<SessionSource> {
        if let Ok(meta) = std::fs::metadata(&self.session_file) {
            if meta.len() > 0 {
                info!(path = %self.session_file.display(), size = meta.len(),
                      "session file found on local storage");
                return Ok(SessionSource::LocalFile);
            }
        }

        if let Some((bytes, updated_at)) = self.repo.load().await? {
            self.write_atomically(&bytes)?;
            info!(size = bytes.len(), %updated_at, "session restored from database");
            return Ok(SessionSource::Database);
        }

        if let Some(encoded) = &self.session_base64 {
            use base64::Engine as _;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|err| {
                    AppError::Config(format!("TELEGRAM_SESSION_BASE64 is not valid base64: {err}"))
                })?;
            self.write_atomically(&bytes)?;
            info!(size = bytes.len(), "session restored from environment seed");
            return Ok(SessionSource::Environment);
        }

        Err(AppError::SessionUnavailable)
    }

    /// Copy the current session file into the store row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read, `AppError::Db`
    /// if the upsert fails.
    pub async fn save_to_store(&self) -> Result<()> {
        let bytes = std::fs::read(&self.session_file)?;
        self.repo.save(&bytes).await?;
        info!(size = bytes.len(), "session saved to database");
        Ok(())
    }

    /// Write a timestamped local backup, pruning to the newest
    /// [`BACKUP_RETENTION`] copies.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on filesystem failures.
    pub fn backup(&self) -> Result<()> {
        if !self.session_file.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.backup_dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_file = self
            .backup_dir
            .join(format!("telegram_session_{stamp}.session"));
        std::fs::copy(&self.session_file, &backup_file)?;

        let mut backups = self.list_backups()?;
        backups.sort();
        while backups.len() > BACKUP_RETENTION {
            let oldest = backups.remove(0);
            std::fs::remove_file(&oldest)?;
            info!(removed = %oldest.display(), "pruned old session backup");
        }

        Ok(())
    }

    /// Facts about the session file for the status endpoint.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        let meta = std::fs::metadata(&self.session_file).ok();
        let modified = meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

        SessionInfo {
            exists: meta.is_some(),
            path: self.session_file.display().to_string(),
            size: meta.as_ref().map_or(0, std::fs::Metadata::len),
            modified,
            backups: self.list_backups().map_or(0, |b| b.len()),
        }
    }

    fn list_backups(&self) -> Result<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("telegram_session_") && name.ends_with(".session") {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Write session bytes via temp file + rename so a crash mid-write can
    /// never leave a truncated session behind.
    fn write_atomically(&self, bytes: &[u8]) -> Result<()> {
        let parent = self
            .session_file
            .parent()
            .ok_or_else(|| AppError::Io("session path has no parent directory".into()))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&self.session_file)
            .map_err(|err| AppError::Io(format!("session rename failed: {err}")))?;

        Ok(())
    }
}

/// Spawn the hourly session persistence task.
///
/// Each tick flushes the live client session to disk, writes a rolling
/// backup, and upserts the bytes into the store.
#[must_use]
pub fn spawn_session_persist_task(
    manager: Arc<SessionManager>,
    api: Arc<dyn TelegramApi>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PERSIST_INTERVAL);
        interval.tick().await; // First tick fires immediately; skip it.
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session persist task shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            if let Err(err) = api.persist_session().await {
                error!(%err, "failed to flush live session to disk");
                continue;
            }
            if let Err(err) = manager.backup() {
                warn!(%err, "session backup failed");
            }
            if let Err(err) = manager.save_to_store().await {
                error!(%err, "failed to save session to store");
            }
        }
    })
}
