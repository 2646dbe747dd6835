//! Row models for the NoETL World engine.
//!
//! One module per table: `workflow_runs`, `workflow_steps`, `workflow_logs`
//! and the `schema_migrations` ledger.

pub mod log;
pub mod migration;
pub mod run;
pub mod step;

pub use log::*;
pub use migration::*;
pub use run::*;
pub use step::*;

use thiserror::Error;

/// A status or level column held a value outside its enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
