//! The World: durable execution of workflow steps.
//!
//! A workflow calls [`World::execute_task`] for each of its steps. The first
//! call for a `(run_id, step_id)` runs the task and records the result; once
//! the step is completed, every later call returns the stored output without
//! invoking the task again. Replaying a workflow after a crash therefore
//! skips straight past the steps whose effects already landed.
//!
//! The memoization check is a read followed by a write, not an atomic claim.
//! Two processes driving the same step at the same moment can both run the
//! task. Steps orphaned in `running` by a crash are reported by
//! [`World::resume_run`] but never reset by the engine.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, WorldConfig};
use crate::db::create_pool;
use crate::db::models::{
    LogLevel, NewLog, RunStatus, RunUpdate, StepStatus, StepUpdate, WorkflowLog, WorkflowRun,
    WorkflowStep,
};
use crate::error::{WorldError, WorldResult};
use crate::result_ext::ResultExt;
use crate::store::{PgStore, WorkflowStore, DEFAULT_LIST_LIMIT};

mod task;

pub use task::{SerializedError, TaskResult};

/// Progress summary returned by `get_run_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusSummary {
    pub status: RunStatus,
    pub completed_steps: usize,
    pub total_steps: usize,
}

/// Recovery information returned by `resume_run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Most recently completed step, by `completed_at`.
    pub last_completed_step: Option<String>,
    /// Steps left `running` or `scheduled`, in `get_steps` order.
    pub pending_steps: Vec<String>,
}

/// Durable execution orchestrator over a [`WorkflowStore`].
pub struct World<S: WorkflowStore = PgStore> {
    store: S,
    config: WorldConfig,
    ready: OnceCell<()>,
    closed: AtomicBool,
}

impl World<PgStore> {
    /// Connect to PostgreSQL and build a World over the builtin schema.
    pub async fn connect(db: &DatabaseConfig, config: WorldConfig) -> WorldResult<Self> {
        let pool = create_pool(db).await.log("creating connection pool")?;
        Ok(Self::new(PgStore::new(pool), config))
    }

    /// Connect using `POSTGRES_*` / `DATABASE_URL` and `WORLD_*` variables.
    pub async fn from_env() -> WorldResult<Self> {
        let db = DatabaseConfig::from_env()?;
        let config = WorldConfig::from_env()?;
        Self::connect(&db, config).await
    }
}

impl<S: WorkflowStore> World<S> {
    pub fn new(store: S, config: WorldConfig) -> Self {
        Self {
            store,
            config,
            ready: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Gate in front of every operation: fails once closed, and applies
    /// pending migrations exactly once before the first operation.
    async fn ready(&self) -> WorldResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorldError::Closed);
        }
        self.ready
            .get_or_try_init(|| async {
                if self.config.auto_migrate {
                    let applied = self.store.migrate().await.log("applying migrations")?;
                    debug!(applied, "World schema ready");
                }
                Ok::<(), WorldError>(())
            })
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------------

    /// Start a run of `workflow_id` and return its generated id.
    pub async fn start_run<I>(&self, workflow_id: &str, input: &I) -> WorldResult<String>
    where
        I: Serialize + ?Sized,
    {
        self.ready().await?;
        let run = WorkflowRun::new(
            generate_run_id(),
            workflow_id,
            Some(serde_json::to_value(input)?),
        );
        self.store.create_run(&run).await.log("creating run")?;

        info!(run_id = %run.id, workflow_id, "Run started");
        Ok(run.id)
    }

    /// Mark a run completed with its output.
    pub async fn complete_run<O>(&self, run_id: &str, output: &O) -> WorldResult<()>
    where
        O: Serialize + ?Sized,
    {
        self.ready().await?;
        let update = RunUpdate {
            status: Some(RunStatus::Completed),
            output: Some(serde_json::to_value(output)?),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        self.finish_run(run_id, &update).await.log("completing run")?;

        info!(run_id, "Run completed");
        Ok(())
    }

    /// Mark a run failed, capturing `error` as `{name, message, stack}`.
    pub async fn fail_run<E>(&self, run_id: &str, error: &E) -> WorldResult<()>
    where
        E: Display + Debug + ?Sized,
    {
        self.ready().await?;
        let captured = SerializedError::capture(error);
        let update = RunUpdate {
            status: Some(RunStatus::Failed),
            error: Some(serde_json::to_value(&captured)?),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        self.finish_run(run_id, &update).await.log("failing run")?;

        warn!(run_id, error = %captured, "Run failed");
        Ok(())
    }

    /// Move a run into a terminal status. A run that already finished keeps
    /// its outcome.
    async fn finish_run(&self, run_id: &str, update: &RunUpdate) -> WorldResult<()> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| WorldError::run_not_found(run_id))?;
        if run.status.is_terminal() {
            return Err(WorldError::Conflict(format!(
                "Run {run_id} is already {}",
                run.status
            )));
        }
        if !self.store.update_run(run_id, update).await? {
            return Err(WorldError::run_not_found(run_id));
        }
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> WorldResult<Option<WorkflowRun>> {
        self.ready().await?;
        self.store.get_run(run_id).await
    }

    /// Most recent runs first; `limit` defaults to 100.
    pub async fn list_runs(
        &self,
        workflow_id: Option<&str>,
        limit: Option<i64>,
    ) -> WorldResult<Vec<WorkflowRun>> {
        self.ready().await?;
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if limit < 0 {
            return Err(WorldError::InvalidArgument(format!("list limit {limit}")));
        }
        self.store.list_runs(workflow_id, limit).await
    }

    /// Run status with step counts.
    pub async fn get_run_status(&self, run_id: &str) -> WorldResult<RunStatusSummary> {
        self.ready().await?;
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| WorldError::run_not_found(run_id))?;
        let steps = self.store.get_steps(run_id).await?;

        Ok(RunStatusSummary {
            status: run.status,
            completed_steps: steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count(),
            total_steps: steps.len(),
        })
    }

    /// Where a crashed or restarted workflow stands.
    ///
    /// `running` steps are reported as pending alongside `scheduled` ones:
    /// a process may have died mid-task. They are left in `running`; the
    /// caller re-drives them through `execute_task`.
    pub async fn resume_run(&self, run_id: &str) -> WorldResult<ResumePoint> {
        self.ready().await?;
        if self.store.get_run(run_id).await?.is_none() {
            return Err(WorldError::run_not_found(run_id));
        }
        let steps = self.store.get_steps(run_id).await?;

        let last_completed_step = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .max_by_key(|s| s.completed_at)
            .map(|s| s.step_id.clone());
        let pending_steps: Vec<String> = steps
            .iter()
            .filter(|s| s.status.is_pending_work())
            .map(|s| s.step_id.clone())
            .collect();

        debug!(
            run_id,
            last_completed = ?last_completed_step,
            pending = pending_steps.len(),
            "Resume point computed"
        );
        Ok(ResumePoint {
            last_completed_step,
            pending_steps,
        })
    }

    /// Delete completed and failed runs older than `older_than_days`
    /// (default: the configured retention). Returns the number deleted.
    pub async fn cleanup(&self, older_than_days: Option<i64>) -> WorldResult<u64> {
        self.ready().await?;
        let days = older_than_days.unwrap_or(self.config.retention_days);
        let out_of_range = || WorldError::InvalidArgument(format!("retention of {days} days"));
        if days < 0 {
            return Err(out_of_range());
        }
        let cutoff = TimeDelta::try_days(days)
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .ok_or_else(out_of_range)?;

        let deleted = self
            .store
            .delete_old_runs(cutoff)
            .await
            .log("deleting old runs")?;
        info!(deleted, days, "Old runs cleaned up");
        Ok(deleted)
    }

    // ---------------------------------------------------------------------
    // Steps
    // ---------------------------------------------------------------------

    /// Run `task` as step `step_id` of `run_id`, at most once to completion.
    ///
    /// If the step is already completed its stored output is deserialized
    /// and returned with `cached = true`; `task` is not called. Otherwise the
    /// step is marked `running`, `task` is awaited, and the step ends
    /// `completed` with the value or `failed` with the captured error. A task
    /// error is returned inside the `TaskResult`; only store and
    /// serialization failures come back as `Err`.
    pub async fn execute_task<T, E, F, Fut>(
        &self,
        run_id: &str,
        step_id: &str,
        task: F,
    ) -> WorldResult<TaskResult<T, E>>
    where
        T: Serialize + DeserializeOwned,
        E: Display + Debug,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_step(run_id, step_id, None, task).await
    }

    /// `execute_task` that also records the step's input.
    pub async fn execute_task_with_input<I, T, E, F, Fut>(
        &self,
        run_id: &str,
        step_id: &str,
        input: &I,
        task: F,
    ) -> WorldResult<TaskResult<T, E>>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        E: Display + Debug,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let input = serde_json::to_value(input)?;
        self.run_step(run_id, step_id, Some(input), task).await
    }

    async fn run_step<T, E, F, Fut>(
        &self,
        run_id: &str,
        step_id: &str,
        input: Option<serde_json::Value>,
        task: F,
    ) -> WorldResult<TaskResult<T, E>>
    where
        T: Serialize + DeserializeOwned,
        E: Display + Debug,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.ready().await?;

        let existing = self.store.get_step(run_id, step_id).await?;
        if let Some(step) = &existing {
            if step.status == StepStatus::Completed {
                let stored = step.output.clone().unwrap_or(serde_json::Value::Null);
                let value = serde_json::from_value(stored)?;
                debug!(run_id, step_id, "Step already completed, returning stored output");
                return Ok(TaskResult::cached(value));
            }
        }

        self.store
            .upsert_step(&WorkflowStep::new(run_id, step_id, StepStatus::Running).started_at(Utc::now()))
            .await
            .log("marking step running")?;

        // Re-driving a step that failed or was orphaned mid-run counts as a retry.
        let retry_count = existing
            .as_ref()
            .filter(|s| matches!(s.status, StepStatus::Failed | StepStatus::Running))
            .map(|s| s.retry_count + 1);
        let clear_outcome = existing
            .as_ref()
            .is_some_and(|s| s.error.is_some() || s.completed_at.is_some());
        if retry_count.is_some() || input.is_some() || clear_outcome {
            let update = StepUpdate {
                input,
                retry_count,
                clear_outcome,
                ..Default::default()
            };
            self.store.update_step(run_id, step_id, &update).await?;
        }
        debug!(run_id, step_id, retry = ?retry_count, "Step running");

        match task().await {
            Ok(value) => {
                let update = StepUpdate {
                    status: Some(StepStatus::Completed),
                    output: Some(serde_json::to_value(&value)?),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                };
                self.store
                    .update_step(run_id, step_id, &update)
                    .await
                    .log("recording step output")?;

                info!(run_id, step_id, "Step completed");
                Ok(TaskResult::fresh(Ok(value)))
            }
            Err(err) => {
                let captured = SerializedError::capture(&err);
                let update = StepUpdate {
                    status: Some(StepStatus::Failed),
                    error: Some(serde_json::to_value(&captured)?),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                };
                self.store
                    .update_step(run_id, step_id, &update)
                    .await
                    .log("recording step failure")?;

                warn!(run_id, step_id, error = %captured, "Step failed");
                Ok(TaskResult::fresh(Err(err)))
            }
        }
    }

    /// Record `task` for execution `delay` from now.
    ///
    /// Nothing is started: an external poller reads due steps with
    /// [`World::due_steps`] and re-drives each through `execute_task`.
    /// Returns the due time, or `None` if the step is already completed and
    /// was left untouched.
    pub async fn schedule_task<D>(
        &self,
        run_id: &str,
        step_id: &str,
        task: &D,
        delay: Duration,
    ) -> WorldResult<Option<DateTime<Utc>>>
    where
        D: Serialize + ?Sized,
    {
        self.ready().await?;

        if let Some(step) = self.store.get_step(run_id, step_id).await? {
            if step.status == StepStatus::Completed {
                debug!(run_id, step_id, "Step already completed, not rescheduling");
                return Ok(None);
            }
        }

        let delay = TimeDelta::from_std(delay)
            .map_err(|e| WorldError::InvalidArgument(format!("schedule delay: {e}")))?;
        let due = Utc::now()
            .checked_add_signed(delay)
            .ok_or_else(|| WorldError::InvalidArgument("schedule delay out of range".into()))?;

        let step = WorkflowStep::new(run_id, step_id, StepStatus::Scheduled)
            .scheduled_for(due)
            .task_data(serde_json::to_value(task)?);
        self.store
            .upsert_step(&step)
            .await
            .log("scheduling step")?;

        info!(run_id, step_id, scheduled_for = %due, "Step scheduled");
        Ok(Some(due))
    }

    /// Scheduled steps due at or before `before`, earliest first.
    pub async fn due_steps(&self, before: DateTime<Utc>) -> WorldResult<Vec<WorkflowStep>> {
        self.ready().await?;
        self.store.get_scheduled_steps(before).await
    }

    pub async fn get_step(&self, run_id: &str, step_id: &str) -> WorldResult<Option<WorkflowStep>> {
        self.ready().await?;
        self.store.get_step(run_id, step_id).await
    }

    pub async fn get_steps(&self, run_id: &str) -> WorldResult<Vec<WorkflowStep>> {
        self.ready().await?;
        self.store.get_steps(run_id).await
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    /// Attach a diagnostic record to a run.
    pub async fn log(
        &self,
        run_id: &str,
        step_id: Option<&str>,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> WorldResult<i64> {
        self.ready().await?;
        let record = NewLog {
            run_id: run_id.to_string(),
            step_id: step_id.map(str::to_string),
            level,
            message: message.into(),
            data,
        };
        self.store.append_log(&record).await
    }

    pub async fn get_logs(&self, run_id: &str) -> WorldResult<Vec<WorkflowLog>> {
        self.ready().await?;
        self.store.get_logs(run_id).await
    }

    /// Release the store. Every later call returns `WorldError::Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store.close().await;
        info!("World closed");
    }
}

/// `run_<unix millis>_<9 random lowercase alphanumerics>`.
fn generate_run_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("run_{}_{}", Utc::now().timestamp_millis(), suffix)
}
