#![forbid(unsafe_code)]

//! `telegram-syncd` — mirrors a Telegram account into a relational CRM
//! store with realtime events, convergent catch-up loops, distributed
//! locking, and an outbox sender.

pub use errors::{AppError, Result};

pub mod config;
pub mod errors;
pub mod http;
pub mod locking;
pub mod models;
pub mod persistence;
pub mod sync;
pub mod telegram;
