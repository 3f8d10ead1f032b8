//! Distributed locking built on the shared store.

pub mod manager;

pub use manager::{local_hostname, LockManager};
