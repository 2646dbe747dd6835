//! In-process store.
//!
//! Mirrors the PostgreSQL semantics (key conflicts, field-level merges,
//! cascade deletes, orderings) without a database. Used for embedding the
//! engine in tests and single-process tools.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::db::models::{
    NewLog, RunUpdate, StepStatus, StepUpdate, WorkflowLog, WorkflowRun, WorkflowStep,
};
use crate::error::{WorldError, WorldResult};

use super::{step_order, WorkflowStore};

#[derive(Default)]
struct MemoryState {
    closed: bool,
    runs: HashMap<String, WorkflowRun>,
    steps: HashMap<(String, String), WorkflowStep>,
    logs: Vec<WorkflowLog>,
    next_log_id: i64,
}

impl MemoryState {
    fn open(&self) -> WorldResult<()> {
        if self.closed {
            Err(WorldError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Store holding all rows in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn migrate(&self) -> WorldResult<usize> {
        self.state.read().await.open()?;
        Ok(0)
    }

    async fn create_run(&self, run: &WorkflowRun) -> WorldResult<()> {
        let mut state = self.state.write().await;
        state.open()?;
        if state.runs.contains_key(&run.id) {
            return Err(WorldError::Conflict(format!("Run already exists: {}", run.id)));
        }
        state.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, id: &str) -> WorldResult<Option<WorkflowRun>> {
        let state = self.state.read().await;
        state.open()?;
        Ok(state.runs.get(id).cloned())
    }

    async fn update_run(&self, id: &str, update: &RunUpdate) -> WorldResult<bool> {
        let mut state = self.state.write().await;
        state.open()?;
        match state.runs.get_mut(id) {
            Some(run) => {
                update.apply_to(run);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_runs(
        &self,
        workflow_id: Option<&str>,
        limit: i64,
    ) -> WorldResult<Vec<WorkflowRun>> {
        let state = self.state.read().await;
        state.open()?;
        let mut runs: Vec<WorkflowRun> = state
            .runs
            .values()
            .filter(|r| workflow_id.map_or(true, |w| r.workflow_id == w))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn delete_old_runs(&self, cutoff: DateTime<Utc>) -> WorldResult<u64> {
        let mut state = self.state.write().await;
        state.open()?;
        let doomed: Vec<String> = state
            .runs
            .values()
            .filter(|r| r.created_at < cutoff && r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect();

        for id in &doomed {
            state.runs.remove(id);
            state.steps.retain(|(run_id, _), _| run_id != id);
            state.logs.retain(|log| &log.run_id != id);
        }
        Ok(doomed.len() as u64)
    }

    async fn upsert_step(&self, step: &WorkflowStep) -> WorldResult<()> {
        let mut state = self.state.write().await;
        state.open()?;
        if !state.runs.contains_key(&step.run_id) {
            return Err(WorldError::run_not_found(&step.run_id));
        }
        state
            .steps
            .entry((step.run_id.clone(), step.step_id.clone()))
            .and_modify(|stored| stored.merge_upsert(step))
            .or_insert_with(|| step.clone());
        Ok(())
    }

    async fn get_step(&self, run_id: &str, step_id: &str) -> WorldResult<Option<WorkflowStep>> {
        let state = self.state.read().await;
        state.open()?;
        Ok(state
            .steps
            .get(&(run_id.to_string(), step_id.to_string()))
            .cloned())
    }

    async fn get_steps(&self, run_id: &str) -> WorldResult<Vec<WorkflowStep>> {
        let state = self.state.read().await;
        state.open()?;
        let mut steps: Vec<WorkflowStep> = state
            .steps
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by(step_order);
        Ok(steps)
    }

    async fn update_step(
        &self,
        run_id: &str,
        step_id: &str,
        update: &StepUpdate,
    ) -> WorldResult<bool> {
        let mut state = self.state.write().await;
        state.open()?;
        match state
            .steps
            .get_mut(&(run_id.to_string(), step_id.to_string()))
        {
            Some(step) => {
                update.apply_to(step);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_scheduled_steps(&self, before: DateTime<Utc>) -> WorldResult<Vec<WorkflowStep>> {
        let state = self.state.read().await;
        state.open()?;
        let mut due: Vec<WorkflowStep> = state
            .steps
            .values()
            .filter(|s| {
                s.status == StepStatus::Scheduled
                    && s.scheduled_for.is_some_and(|at| at <= before)
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.scheduled_for);
        Ok(due)
    }

    async fn append_log(&self, log: &NewLog) -> WorldResult<i64> {
        let mut state = self.state.write().await;
        state.open()?;
        if !state.runs.contains_key(&log.run_id) {
            return Err(WorldError::run_not_found(&log.run_id));
        }
        state.next_log_id += 1;
        let id = state.next_log_id;
        state.logs.push(WorkflowLog {
            id,
            run_id: log.run_id.clone(),
            step_id: log.step_id.clone(),
            level: log.level,
            message: log.message.clone(),
            data: log.data.clone(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn get_logs(&self, run_id: &str) -> WorldResult<Vec<WorkflowLog>> {
        let state = self.state.read().await;
        state.open()?;
        Ok(state
            .logs
            .iter()
            .filter(|log| log.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn close(&self) {
        self.state.write().await.closed = true;
    }
}
