//! PostgreSQL store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{
    NewLog, RunUpdate, StepUpdate, WorkflowLog, WorkflowRun, WorkflowStep,
};
use crate::db::DbPool;
use crate::error::{WorldError, WorldResult};
use crate::migrations::{MigrationRegistry, MigrationRunner};

use super::WorkflowStore;

/// Store backed by a shared PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    registry: Arc<MigrationRegistry>,
}

impl PgStore {
    /// Store using the builtin schema.
    pub fn new(pool: DbPool) -> Self {
        Self::with_registry(pool, MigrationRegistry::builtin())
    }

    /// Store whose `migrate` applies a caller-supplied registry.
    pub fn with_registry(pool: DbPool, registry: MigrationRegistry) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn migration_runner(&self) -> MigrationRunner {
        MigrationRunner::new(self.pool.clone(), Arc::clone(&self.registry))
    }
}

/// Inserting a step for a run that does not exist trips the foreign key.
fn missing_run(err: sqlx::Error, run_id: &str) -> WorldError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            WorldError::run_not_found(run_id)
        }
        _ => WorldError::Database(err),
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn migrate(&self) -> WorldResult<usize> {
        self.migration_runner().run().await
    }

    async fn create_run(&self, run: &WorkflowRun) -> WorldResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (
                id, workflow_id, input, output, error, status, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&run.id)
        .bind(&run.workflow_id)
        .bind(&run.input)
        .bind(&run.output)
        .bind(&run.error)
        .bind(run.status.as_str())
        .bind(run.created_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                WorldError::Conflict(format!("Run already exists: {}", run.id))
            }
            _ => WorldError::Database(e),
        })?;

        Ok(())
    }

    async fn get_run(&self, id: &str) -> WorldResult<Option<WorkflowRun>> {
        let run = sqlx::query_as::<_, WorkflowRun>(
            r#"
            SELECT id, workflow_id, input, output, error, status, created_at, completed_at
            FROM workflow_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    async fn update_run(&self, id: &str, update: &RunUpdate) -> WorldResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status       = COALESCE($2::TEXT, status),
                output       = COALESCE($3::JSONB, output),
                error        = COALESCE($4::JSONB, error),
                completed_at = COALESCE($5::TIMESTAMPTZ, completed_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.output)
        .bind(&update.error)
        .bind(update.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_runs(
        &self,
        workflow_id: Option<&str>,
        limit: i64,
    ) -> WorldResult<Vec<WorkflowRun>> {
        let runs = sqlx::query_as::<_, WorkflowRun>(
            r#"
            SELECT id, workflow_id, input, output, error, status, created_at, completed_at
            FROM workflow_runs
            WHERE ($1::TEXT IS NULL OR workflow_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }

    async fn delete_old_runs(&self, cutoff: DateTime<Utc>) -> WorldResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_runs
            WHERE created_at < $1
              AND status IN ('completed', 'failed')
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_step(&self, step: &WorkflowStep) -> WorldResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (
                run_id, step_id, status, input, output, error,
                started_at, completed_at, scheduled_for, task_data, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (run_id, step_id) DO UPDATE
            SET status        = EXCLUDED.status,
                scheduled_for = EXCLUDED.scheduled_for,
                task_data     = EXCLUDED.task_data,
                started_at    = COALESCE(EXCLUDED.started_at, workflow_steps.started_at)
            "#,
        )
        .bind(&step.run_id)
        .bind(&step.step_id)
        .bind(step.status.as_str())
        .bind(&step.input)
        .bind(&step.output)
        .bind(&step.error)
        .bind(step.started_at)
        .bind(step.completed_at)
        .bind(step.scheduled_for)
        .bind(&step.task_data)
        .bind(step.retry_count)
        .execute(&self.pool)
        .await
        .map_err(|e| missing_run(e, &step.run_id))?;

        Ok(())
    }

    async fn get_step(&self, run_id: &str, step_id: &str) -> WorldResult<Option<WorkflowStep>> {
        let step = sqlx::query_as::<_, WorkflowStep>(
            r#"
            SELECT run_id, step_id, status, input, output, error,
                   started_at, completed_at, scheduled_for, task_data, retry_count
            FROM workflow_steps
            WHERE run_id = $1 AND step_id = $2
            "#,
        )
        .bind(run_id)
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(step)
    }

    async fn get_steps(&self, run_id: &str) -> WorldResult<Vec<WorkflowStep>> {
        let steps = sqlx::query_as::<_, WorkflowStep>(
            r#"
            SELECT run_id, step_id, status, input, output, error,
                   started_at, completed_at, scheduled_for, task_data, retry_count
            FROM workflow_steps
            WHERE run_id = $1
            ORDER BY started_at ASC NULLS LAST, step_id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(steps)
    }

    async fn update_step(
        &self,
        run_id: &str,
        step_id: &str,
        update: &StepUpdate,
    ) -> WorldResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status        = COALESCE($3::TEXT, status),
                input         = COALESCE($4::JSONB, input),
                output        = COALESCE($5::JSONB, output),
                error         = COALESCE($6::JSONB, CASE WHEN $12::BOOLEAN THEN NULL ELSE error END),
                started_at    = COALESCE($7::TIMESTAMPTZ, started_at),
                completed_at  = COALESCE($8::TIMESTAMPTZ, CASE WHEN $12::BOOLEAN THEN NULL ELSE completed_at END),
                scheduled_for = COALESCE($9::TIMESTAMPTZ, scheduled_for),
                task_data     = COALESCE($10::JSONB, task_data),
                retry_count   = COALESCE($11::INTEGER, retry_count)
            WHERE run_id = $1 AND step_id = $2
            "#,
        )
        .bind(run_id)
        .bind(step_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.input)
        .bind(&update.output)
        .bind(&update.error)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(update.scheduled_for)
        .bind(&update.task_data)
        .bind(update.retry_count)
        .bind(update.clear_outcome)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_scheduled_steps(&self, before: DateTime<Utc>) -> WorldResult<Vec<WorkflowStep>> {
        let steps = sqlx::query_as::<_, WorkflowStep>(
            r#"
            SELECT run_id, step_id, status, input, output, error,
                   started_at, completed_at, scheduled_for, task_data, retry_count
            FROM workflow_steps
            WHERE status = 'scheduled' AND scheduled_for <= $1
            ORDER BY scheduled_for ASC
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        Ok(steps)
    }

    async fn append_log(&self, log: &NewLog) -> WorldResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO workflow_logs (run_id, step_id, level, message, data, "timestamp")
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&log.run_id)
        .bind(&log.step_id)
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(&log.data)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| missing_run(e, &log.run_id))?;

        Ok(row.0)
    }

    async fn get_logs(&self, run_id: &str) -> WorldResult<Vec<WorkflowLog>> {
        let logs = sqlx::query_as::<_, WorkflowLog>(
            r#"
            SELECT id, run_id, step_id, level, message, data, "timestamp"
            FROM workflow_logs
            WHERE run_id = $1
            ORDER BY "timestamp" ASC, id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}
