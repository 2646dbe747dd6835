//! Workflow run model.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::UnknownVariant;

/// Lifecycle status of a run.
///
/// `Paused` can be stored and read back, but no engine operation moves a run
/// into or out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl RunStatus {
    /// Terminal runs are eligible for retention cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "paused" => Ok(RunStatus::Paused),
            other => Err(UnknownVariant {
                kind: "run status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = UnknownVariant;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Database run record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRun {
    /// Run identifier (generated).
    pub id: String,

    /// Logical workflow name supplied by the caller.
    pub workflow_id: String,

    /// Run input (opaque JSON).
    pub input: Option<serde_json::Value>,

    /// Run output (opaque JSON).
    pub output: Option<serde_json::Value>,

    /// Serialized failure.
    pub error: Option<serde_json::Value>,

    /// Run status.
    #[sqlx(try_from = "String")]
    pub status: RunStatus,

    /// When the run was created.
    pub created_at: DateTime<Utc>,

    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// A freshly started run.
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        input: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            input,
            output: None,
            error: None,
            status: RunStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Partial update of a run. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub output: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunUpdate {
    /// Apply the provided fields onto an in-memory run.
    pub fn apply_to(&self, run: &mut WorkflowRun) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(output) = &self.output {
            run.output = Some(output.clone());
        }
        if let Some(error) = &self.error {
            run.error = Some(error.clone());
        }
        if let Some(completed_at) = self.completed_at {
            run.completed_at = Some(completed_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_status_round_trip() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Paused,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn test_update_merges_only_provided_fields() {
        let mut run = WorkflowRun::new("run_1", "wf1", Some(json!({"x": 1})));
        RunUpdate {
            output: Some(json!(42)),
            ..Default::default()
        }
        .apply_to(&mut run);

        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.output, Some(json!(42)));
        assert_eq!(run.input, Some(json!({"x": 1})));
        assert!(run.completed_at.is_none());
    }
}
