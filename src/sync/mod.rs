//! Sync engine: fan-in router, single-writer processor, convergence
//! loops, outbox sender, and the worker coordinator.

pub mod catchup;
pub mod discovery;
pub mod outbox;
pub mod processor;
pub mod router;
pub mod status;
pub mod worker;
