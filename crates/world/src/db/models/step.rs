//! Workflow step model.
//!
//! A step is keyed by `(run_id, step_id)`. Once a step is `Completed` its
//! stored output is authoritative and the task that produced it is never
//! invoked again for the same key.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::UnknownVariant;

/// Lifecycle status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Scheduled,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Scheduled => "scheduled",
        }
    }

    /// Steps a resumed workflow still has to drive.
    pub fn is_pending_work(self) -> bool {
        matches!(self, StepStatus::Running | StepStatus::Scheduled)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            "scheduled" => Ok(StepStatus::Scheduled),
            other => Err(UnknownVariant {
                kind: "step status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for StepStatus {
    type Error = UnknownVariant;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Database step record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Owning run.
    pub run_id: String,

    /// Caller-chosen step identifier, unique within the run.
    pub step_id: String,

    /// Step status.
    #[sqlx(try_from = "String")]
    pub status: StepStatus,

    /// Step input (opaque JSON).
    pub input: Option<serde_json::Value>,

    /// Step output (opaque JSON).
    pub output: Option<serde_json::Value>,

    /// Serialized task failure.
    pub error: Option<serde_json::Value>,

    /// When the step last entered `running`.
    pub started_at: Option<DateTime<Utc>>,

    /// When the step reached `completed` or `failed`.
    pub completed_at: Option<DateTime<Utc>>,

    /// Due time of a scheduled step.
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Opaque descriptor of a scheduled task.
    pub task_data: Option<serde_json::Value>,

    /// Number of times the step was re-driven after a failure or crash.
    pub retry_count: i32,
}

impl WorkflowStep {
    /// A blank step row in the given status.
    pub fn new(run_id: impl Into<String>, step_id: impl Into<String>, status: StepStatus) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            status,
            input: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            scheduled_for: None,
            task_data: None,
            retry_count: 0,
        }
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn task_data(mut self, data: serde_json::Value) -> Self {
        self.task_data = Some(data);
        self
    }

    /// Conflict resolution of `upsert_step`: status, schedule and task data
    /// are taken from `incoming`; `started_at` is only replaced when
    /// `incoming` carries one. Every other stored column is kept.
    pub fn merge_upsert(&mut self, incoming: &WorkflowStep) {
        self.status = incoming.status;
        self.scheduled_for = incoming.scheduled_for;
        self.task_data = incoming.task_data.clone();
        if incoming.started_at.is_some() {
            self.started_at = incoming.started_at;
        }
    }
}

/// Partial update of a step. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepUpdate {
    pub status: Option<StepStatus>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub task_data: Option<serde_json::Value>,
    pub retry_count: Option<i32>,
    /// Reset `error` and `completed_at` before the other fields apply.
    pub clear_outcome: bool,
}

impl StepUpdate {
    /// Apply the provided fields onto an in-memory step.
    pub fn apply_to(&self, step: &mut WorkflowStep) {
        if self.clear_outcome {
            step.error = None;
            step.completed_at = None;
        }
        if let Some(status) = self.status {
            step.status = status;
        }
        if let Some(input) = &self.input {
            step.input = Some(input.clone());
        }
        if let Some(output) = &self.output {
            step.output = Some(output.clone());
        }
        if let Some(error) = &self.error {
            step.error = Some(error.clone());
        }
        if let Some(at) = self.started_at {
            step.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            step.completed_at = Some(at);
        }
        if let Some(at) = self.scheduled_for {
            step.scheduled_for = Some(at);
        }
        if let Some(data) = &self.task_data {
            step.task_data = Some(data.clone());
        }
        if let Some(count) = self.retry_count {
            step.retry_count = count;
        }
    }
}
