//! Persistence for runs, steps and diagnostic logs.
//!
//! The store is pure persistence: it merges, filters and orders rows but
//! never decides what a status transition means. That is the World's job.
//!
//! - [`PgStore`]: PostgreSQL over a shared `sqlx` pool
//! - [`MemoryStore`]: same semantics held in process memory

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{
    NewLog, RunUpdate, StepUpdate, WorkflowLog, WorkflowRun, WorkflowStep,
};
use crate::error::WorldResult;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Default page size of `list_runs`.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Typed persistence operations used by the World.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Bring the backing schema up to date. Returns the number of
    /// migrations applied.
    async fn migrate(&self) -> WorldResult<usize>;

    async fn create_run(&self, run: &WorkflowRun) -> WorldResult<()>;

    async fn get_run(&self, id: &str) -> WorldResult<Option<WorkflowRun>>;

    /// Merge the provided fields into a run. Returns `false` if no run
    /// has this id.
    async fn update_run(&self, id: &str, update: &RunUpdate) -> WorldResult<bool>;

    /// Most recent runs first, optionally restricted to one workflow.
    async fn list_runs(&self, workflow_id: Option<&str>, limit: i64)
        -> WorldResult<Vec<WorkflowRun>>;

    /// Delete completed or failed runs created before `cutoff`, with their
    /// steps and logs. Running and paused runs are never matched.
    async fn delete_old_runs(&self, cutoff: DateTime<Utc>) -> WorldResult<u64>;

    /// Insert a step, or on key conflict overwrite its status, schedule and
    /// task data. The stored `started_at` survives unless `step` carries one.
    async fn upsert_step(&self, step: &WorkflowStep) -> WorldResult<()>;

    async fn get_step(&self, run_id: &str, step_id: &str) -> WorldResult<Option<WorkflowStep>>;

    /// Steps of a run by `started_at` ascending; never-started steps last.
    async fn get_steps(&self, run_id: &str) -> WorldResult<Vec<WorkflowStep>>;

    /// Field-level merge into a step. Returns `false` if the step does not
    /// exist.
    async fn update_step(&self, run_id: &str, step_id: &str, update: &StepUpdate)
        -> WorldResult<bool>;

    /// Scheduled steps due at or before `before`, earliest first.
    async fn get_scheduled_steps(&self, before: DateTime<Utc>) -> WorldResult<Vec<WorkflowStep>>;

    /// Append a diagnostic record. Returns its id.
    async fn append_log(&self, log: &NewLog) -> WorldResult<i64>;

    /// Diagnostic records of a run in timestamp order.
    async fn get_logs(&self, run_id: &str) -> WorldResult<Vec<WorkflowLog>>;

    /// Release the underlying resources. Later calls fail.
    async fn close(&self);
}

/// Ordering used by `get_steps`: `started_at` ascending, `None` last, then
/// by step id so ties are stable.
pub(crate) fn step_order(a: &WorkflowStep, b: &WorkflowStep) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let by_start = match (a.started_at, b.started_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_start.then_with(|| a.step_id.cmp(&b.step_id))
}
