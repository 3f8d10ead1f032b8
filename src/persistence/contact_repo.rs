//! Contact and source-identity repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::models::contact::PresenceStatus;
use crate::Result;

use super::db::Database;

/// Source tag for every identity this worker owns.
const SOURCE: &str = "telegram";

/// Repository over the `contact` and `source_identity` tables.
#[derive(Clone)]
pub struct ContactRepo {
    db: Arc<Database>,
}

impl ContactRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve a contact id by its `(telegram, external_id)` identity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_by_identity(&self, external_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT c.id FROM contact c
             JOIN source_identity si ON si.contact_id = c.id
             WHERE si.source = $1 AND si.external_id = $2
             LIMIT 1",
        )
        .bind(SOURCE)
        .bind(external_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    /// Ensure a contact exists for a private-chat identity, creating the
    /// contact and identity rows when absent.
    ///
    /// Safe under concurrent creators: the identity's unique key decides the
    /// winner and the loser re-reads the surviving row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup or insert fails.
    pub async fn ensure_contact(
        &self,
        external_id: &str,
        display_name: &str,
        username: Option<&str>,
    ) -> Result<String> {
        if let Some(id) = self.find_by_identity(external_id).await? {
            return Ok(id);
        }

        let contact_id = Uuid::new_v4().to_string();
        let identity_id = Uuid::new_v4().to_string();

        let mut tx = self.db.begin().await?;
        sqlx::query("INSERT INTO contact (id, display_name) VALUES ($1, $2)")
            .bind(&contact_id)
            .bind(display_name)
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            "INSERT INTO source_identity (id, contact_id, source, external_id, username)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (source, external_id) DO NOTHING",
        )
        .bind(&identity_id)
        .bind(&contact_id)
        .bind(SOURCE)
        .bind(external_id)
        .bind(username)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost the race; drop our contact row and adopt the winner's.
            tx.rollback().await?;
            if let Some(id) = self.find_by_identity(external_id).await? {
                return Ok(id);
            }
            return Ok(contact_id);
        }

        tx.commit().await?;
        Ok(contact_id)
    }

    /// Update presence fields for the contact behind an identity.
    ///
    /// Writes only when the observed values differ, so routine presence
    /// sweeps over unchanged contacts cost nothing. Returns whether a row
    /// was updated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_presence(
        &self,
        external_id: &str,
        status: PresenceStatus,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let is_online = status.is_online();
        let result = sqlx::query(
            "UPDATE contact c SET
                 is_online = $2,
                 online_status = $3,
                 last_seen_at = COALESCE($4, c.last_seen_at),
                 last_status_check = NOW(),
                 updated_at = NOW()
             FROM source_identity si
             WHERE si.contact_id = c.id
               AND si.source = $5
               AND si.external_id = $1
               AND (c.is_online != $2 OR c.online_status IS DISTINCT FROM $3)",
        )
        .bind(external_id)
        .bind(is_online)
        .bind(status.as_str())
        .bind(last_seen_at)
        .bind(SOURCE)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
