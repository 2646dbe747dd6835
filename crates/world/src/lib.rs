//! NoETL World Library
//!
//! Durable step execution for long-running workflows. Progress is recorded
//! in PostgreSQL so that a workflow restarted after a crash skips every step
//! that already completed instead of running it again.
//!
//! ## Architecture
//!
//! - **Migrations**: a versioned, reversible schema ledger applied once,
//!   lazily, before the first engine operation
//! - **Store**: typed persistence over workflow runs, steps and logs
//! - **World**: the execution protocol (start, execute, schedule, complete,
//!   fail, resume, cleanup)
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Connection pooling and row models
//! - [`error`]: Engine error types
//! - [`migrations`]: Migration registry and runner
//! - [`store`]: `WorkflowStore` with PostgreSQL and in-memory backends
//! - [`world`]: The `World` orchestrator
//!
//! ## Example
//!
//! ```ignore
//! use noetl_world::{World, WorldConfig, DatabaseConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let world = World::connect(&DatabaseConfig::from_env()?, WorldConfig::default()).await?;
//!     let run_id = world.start_run("swap", &serde_json::json!({"amount": 10})).await?;
//!
//!     let quote = world
//!         .execute_task(&run_id, "quote", || async { fetch_quote().await })
//!         .await?;
//!     match quote.into_outcome() {
//!         Ok(q) => world.complete_run(&run_id, &q).await?,
//!         Err(e) => world.fail_run(&run_id, &e).await?,
//!     }
//!     world.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod migrations;
pub mod result_ext;
pub mod store;
pub mod world;

pub use config::{DatabaseConfig, WorldConfig};
pub use error::{WorldError, WorldResult};
pub use result_ext::ResultExt;
pub use store::{MemoryStore, PgStore, WorkflowStore};
pub use world::{ResumePoint, RunStatusSummary, SerializedError, TaskResult, World};
