//! `PostgreSQL` connection pool and schema bootstrap.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `PostgreSQL` connection pool.
pub type Database = PgPool;

/// Connect to the store and apply the schema bootstrap.
///
/// The caller is expected to pass a connection string already stripped of
/// any ORM-specific `?schema=` suffix (see [`crate::config::strip_schema_param`]).
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect(database_url: &str) -> Result<Database> {
    let opts = PgConnectOptions::from_str(database_url)
        .map_err(|err| AppError::Db(format!("invalid DATABASE_URL: {err}")))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}
