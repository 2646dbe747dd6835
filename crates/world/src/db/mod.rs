//! Database module for the NoETL World engine.
//!
//! Connection pooling and the row models for runs, steps, logs and the
//! migration ledger.

pub mod models;
pub mod pool;

pub use pool::{create_pool, health_check, DbPool};
