//! Persistence layer modules.

pub mod contact_repo;
pub mod conversation_repo;
pub mod db;
pub mod message_repo;
pub mod outbox_repo;
pub mod schema;
pub mod state_repo;
pub mod worker_session_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::PgPool;
