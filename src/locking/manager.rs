//! Database-backed distributed lock manager with automatic expiration.
//!
//! Locks live in the shared store, so they survive crashes and coordinate
//! across hosts. A lease expires on its own (`expires_at`), a heartbeat
//! keeps long-held leases alive, and same-host rows whose holder PID is
//! gone are reaped eagerly so a crashed listener can be replaced without
//! waiting out the lease.

use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::lock::{LockHolder, LockType};
use crate::persistence::db::Database;
use crate::Result;

/// A lease currently held by this process.
#[derive(Debug, Clone)]
struct HeldLock {
    lock_type: LockType,
    lock_key: String,
    id: String,
}

/// Distributed lock manager bound to this process's identity.
pub struct LockManager {
    db: Arc<Database>,
    process_id: String,
    hostname: String,
    held: Mutex<Vec<HeldLock>>,
}

impl LockManager {
    /// Create a manager using this process's PID and hostname.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            process_id: std::process::id().to_string(),
            hostname: local_hostname(),
            held: Mutex::new(Vec::new()),
        }
    }

    /// This process's identity as recorded on lock rows.
    #[must_use]
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Hostname recorded on lock rows.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Attempt to acquire a lease.
    ///
    /// Expired rows and same-host rows with a dead holder are reaped first,
    /// then the insert races on the `(lock_type, lock_key)` unique key.
    /// Returns `true` iff this process now holds the lease. A contested
    /// lock is a normal `false`, not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any store operation fails.
    pub async fn acquire(
        &self,
        lock_type: LockType,
        lock_key: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<bool> {
        let lock_id = Uuid::new_v4().to_string()[..24].to_string();
        let expires_at = Utc::now() + lock_type.duration();

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM sync_lock WHERE expires_at < NOW()")
            .execute(&mut *tx)
            .await?;

        // Reap same-host rows whose holder no longer exists. Remote
        // hostnames are never probed; their rows only die by expiry.
        let local_rows = sqlx::query(
            "SELECT id, process_id, lock_type, lock_key FROM sync_lock
             WHERE hostname = $1 AND expires_at > NOW()",
        )
        .bind(&self.hostname)
        .fetch_all(&mut *tx)
        .await?;

        for row in local_rows {
            let pid: String = row.get("process_id");
            if !process_alive(&pid) {
                let stale_id: String = row.get("id");
                let stale_type: String = row.get("lock_type");
                let stale_key: String = row.get("lock_key");
                sqlx::query("DELETE FROM sync_lock WHERE id = $1")
                    .bind(&stale_id)
                    .execute(&mut *tx)
                    .await?;
                warn!(lock_type = %stale_type, lock_key = %stale_key, dead_pid = %pid,
                      "reaped lock held by dead process");
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO sync_lock (
                 id, lock_type, lock_key, process_id, hostname,
                 acquired_at, expires_at, heartbeat_at, metadata
             )
             VALUES ($1, $2, $3, $4, $5, NOW(), $6, NOW(), $7)
             ON CONFLICT (lock_type, lock_key) DO NOTHING
             RETURNING id",
        )
        .bind(&lock_id)
        .bind(lock_type.as_str())
        .bind(lock_key)
        .bind(&self.process_id)
        .bind(&self.hostname)
        .bind(expires_at)
        .bind(metadata)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        match inserted {
            Some(row) => {
                let id: String = row.get("id");
                if let Ok(mut held) = self.held.lock() {
                    held.push(HeldLock {
                        lock_type,
                        lock_key: lock_key.to_string(),
                        id,
                    });
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Refresh every lease held by this process.
    ///
    /// Must run at least every half-lease for long-held locks; the worker
    /// calls it on the 30 s heartbeat. Returns the number of rows refreshed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any refresh fails.
    pub async fn heartbeat(&self) -> Result<u64> {
        let held: Vec<HeldLock> = match self.held.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return Ok(0),
        };

        let mut refreshed = 0;
        for lock in held {
            let secs = lock.lock_type.duration().num_seconds();
            #[allow(clippy::cast_precision_loss)] // Lease durations are small.
            let result = sqlx::query(
                "UPDATE sync_lock SET
                     heartbeat_at = NOW(),
                     expires_at = NOW() + make_interval(secs => $3)
                 WHERE id = $1 AND process_id = $2",
            )
            .bind(&lock.id)
            .bind(&self.process_id)
            .bind(secs as f64)
            .execute(self.db.as_ref())
            .await?;
            refreshed += result.rows_affected();
        }

        Ok(refreshed)
    }

    /// Report who holds a lock, reaping a dead same-host holder on the way.
    ///
    /// Returns `None` when the lock is free (or was freed by the reap).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any store operation fails.
    pub async fn check(
        &self,
        lock_type: LockType,
        lock_key: &str,
        verify_alive: bool,
    ) -> Result<Option<LockHolder>> {
        let row = sqlx::query(
            "SELECT id, process_id, hostname, acquired_at, heartbeat_at, metadata
             FROM sync_lock
             WHERE lock_type = $1 AND lock_key = $2 AND expires_at > NOW()",
        )
        .bind(lock_type.as_str())
        .bind(lock_key)
        .fetch_optional(self.db.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let holder_pid: String = row.get("process_id");
        let holder_host: String = row.get("hostname");

        if verify_alive && holder_host == self.hostname && !process_alive(&holder_pid) {
            let stale_id: String = row.get("id");
            sqlx::query("DELETE FROM sync_lock WHERE id = $1")
                .bind(&stale_id)
                .execute(self.db.as_ref())
                .await?;
            info!(lock_type = lock_type.as_str(), lock_key, dead_pid = %holder_pid,
                  "reaped lock held by dead process");
            return Ok(None);
        }

        Ok(Some(LockHolder {
            process_id: holder_pid,
            hostname: holder_host,
            acquired_at: row.get("acquired_at"),
            heartbeat_at: row.get("heartbeat_at"),
            metadata: row.get("metadata"),
        }))
    }

    /// Release one lease held by this process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn release(&self, lock_type: LockType, lock_key: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM sync_lock
             WHERE lock_type = $1 AND lock_key = $2 AND process_id = $3",
        )
        .bind(lock_type.as_str())
        .bind(lock_key)
        .bind(&self.process_id)
        .execute(self.db.as_ref())
        .await?;

        if let Ok(mut held) = self.held.lock() {
            held.retain(|l| !(l.lock_type == lock_type && l.lock_key == lock_key));
        }

        Ok(())
    }

    /// Release every lease held by this process. Called on shutdown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn release_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_lock WHERE process_id = $1")
            .bind(&self.process_id)
            .execute(self.db.as_ref())
            .await?;

        if let Ok(mut held) = self.held.lock() {
            held.clear();
        }

        Ok(result.rows_affected())
    }

    /// Force-release a lock regardless of holder. Operator escape hatch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn force_release(&self, lock_type: LockType, lock_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_lock WHERE lock_type = $1 AND lock_key = $2")
            .bind(lock_type.as_str())
            .bind(lock_key)
            .execute(self.db.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Probe whether a PID exists on this host.
///
/// A malformed PID string counts as dead; its lock row is unrecoverable
/// garbage either way.
#[cfg(unix)]
fn process_alive(pid: &str) -> bool {
    let Ok(pid) = pid.parse::<i32>() else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: &str) -> bool {
    true
}

/// Hostname recorded on lock and state rows.
#[cfg(unix)]
#[must_use]
pub fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(unix))]
#[must_use]
pub fn local_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
}
