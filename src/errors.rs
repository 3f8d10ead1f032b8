//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `PostgreSQL`.
    Db(String),
    /// Telegram API or connection failure.
    Telegram(String),
    /// No usable session could be restored from file, store, or environment.
    SessionUnavailable,
    /// Another process holds the requested lock.
    LockContested(String),
    /// Upstream rate limit; carries the server-mandated wait in seconds.
    FloodWait(u64),
    /// Upstream denied access to a chat (private channel, admin required,
    /// or the entity no longer exists).
    AccessDenied(String),
    /// Outbound message dispatch failure, attributed to the outbox item.
    Outbox(String),
    /// HTTP surface failure.
    Http(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Telegram(msg) => write!(f, "telegram: {msg}"),
            Self::SessionUnavailable => {
                f.write_str("no telegram session available from file, database, or environment")
            }
            Self::LockContested(msg) => write!(f, "lock contested: {msg}"),
            Self::FloodWait(secs) => write!(f, "flood wait: retry after {secs}s"),
            Self::AccessDenied(msg) => write!(f, "access denied: {msg}"),
            Self::Outbox(msg) => write!(f, "outbox: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("json: {err}"))
    }
}
