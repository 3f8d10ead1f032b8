//! Worker configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::{AppError, Result};

/// Default heartbeat period for the lock and listener-state refresh.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Conversations examined by the startup catch-up pass.
pub const CATCH_UP_CONVERSATIONS: i64 = 50;
/// Per-conversation message cap for the startup catch-up pass.
pub const CATCH_UP_LIMIT: usize = 200;

/// Conversations examined per active-poll iteration.
pub const ACTIVE_POLL_CONVERSATIONS: i64 = 100;
/// Per-conversation message cap for the active poll and full catch-up.
pub const POLL_MESSAGES_PER_CONVERSATION: usize = 10;

/// Conversations examined per full catch-up iteration.
pub const FULL_CATCHUP_CONVERSATIONS: i64 = 200;

/// Messages seeded into a newly discovered conversation.
pub const INITIAL_SEED_LIMIT: usize = 50;
/// Empty conversations healed per startup scan.
pub const EMPTY_CONVERSATION_SCAN_LIMIT: i64 = 100;

/// Inter-call pacing for upstream requests inside loops.
pub const UPSTREAM_PACING: Duration = Duration::from_millis(400);

/// Worker configuration resolved from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection string, with any Prisma-style `?schema=` suffix
    /// stripped (the ORM that owns the schema appends it; sqlx does not
    /// understand the parameter).
    pub database_url: String,
    /// Telegram application id.
    pub api_id: i32,
    /// Telegram application hash.
    pub api_hash: String,
    /// Phone number the mirrored account is registered under.
    pub phone_number: String,
    /// Filesystem path of the session blob (no extension).
    pub session_path: PathBuf,
    /// Health/status HTTP port.
    pub http_port: u16,
    /// Active-poll loop period.
    pub active_poll_interval: Duration,
    /// Full catch-up loop period.
    pub full_catchup_interval: Duration,
    /// Dialog discovery loop period.
    pub dialog_discovery_interval: Duration,
    /// Maximum dialogs examined per discovery scan.
    pub dialog_discovery_limit: usize,
    /// Optional base64-encoded session seed for first deployment.
    pub session_base64: Option<String>,
}

impl Config {
    /// Resolve configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// numeric variable fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary lookup function.
    ///
    /// The seam exists so tests can inject a map instead of mutating the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// numeric variable fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = strip_schema_param(&required(&lookup, "DATABASE_URL")?);
        let api_id = parse_num::<i32>(&lookup, "TELEGRAM_API_ID", None)?
            .ok_or_else(|| AppError::Config("TELEGRAM_API_ID is required".into()))?;
        let api_hash = required(&lookup, "TELEGRAM_API_HASH")?;
        let phone_number = required(&lookup, "TELEGRAM_PHONE_NUMBER")?;

        let session_path = lookup("SESSION_PATH")
            .map_or_else(|| PathBuf::from("/data/sessions/telegram_session"), PathBuf::from);

        let http_port = parse_num::<u16>(&lookup, "PORT", Some(8080))?
            .unwrap_or(8080);

        let active_poll_interval =
            Duration::from_secs(parse_num::<u64>(&lookup, "ACTIVE_POLL_INTERVAL", Some(120))?.unwrap_or(120));
        let full_catchup_interval =
            Duration::from_secs(parse_num::<u64>(&lookup, "FULL_CATCHUP_INTERVAL", Some(900))?.unwrap_or(900));
        let dialog_discovery_interval = Duration::from_secs(
            parse_num::<u64>(&lookup, "DIALOG_DISCOVERY_INTERVAL", Some(900))?.unwrap_or(900),
        );
        let dialog_discovery_limit =
            parse_num::<usize>(&lookup, "DIALOG_DISCOVERY_LIMIT", Some(200))?.unwrap_or(200);

        let session_base64 = lookup("TELEGRAM_SESSION_BASE64").filter(|v| !v.is_empty());

        Ok(Self {
            database_url,
            api_id,
            api_hash,
            phone_number,
            session_path,
            http_port,
            active_poll_interval,
            full_catchup_interval,
            dialog_discovery_interval,
            dialog_discovery_limit,
            session_base64,
        })
    }

    /// Presence flags for the environment variables the worker consumes,
    /// surfaced by `GET /status` for deployment debugging.
    #[must_use]
    pub fn env_presence() -> serde_json::Value {
        let present = |key: &str| std::env::var(key).is_ok_and(|v| !v.is_empty());
        serde_json::json!({
            "DATABASE_URL": present("DATABASE_URL"),
            "TELEGRAM_API_ID": present("TELEGRAM_API_ID"),
            "TELEGRAM_API_HASH": present("TELEGRAM_API_HASH"),
            "TELEGRAM_PHONE_NUMBER": present("TELEGRAM_PHONE_NUMBER"),
            "TELEGRAM_SESSION_BASE64": present("TELEGRAM_SESSION_BASE64"),
            "SESSION_PATH": present("SESSION_PATH"),
        })
    }
}

/// Strip a Prisma-style `?schema=…` suffix from a connection string.
#[must_use]
pub fn strip_schema_param(url: &str) -> String {
    url.split_once("?schema=")
        .map_or_else(|| url.to_string(), |(base, _)| base.to_string())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Config(format!("{key} is required")))
}

fn parse_num<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Option<T>,
) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{key} must be numeric, got '{raw}'"))),
        _ => Ok(default),
    }
}
