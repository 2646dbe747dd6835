//! Task outcomes and error capture.

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

/// Failure of a task or run, stored as plain fields in the `error` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    /// Short type name of the error.
    pub name: String,
    /// `Display` rendering.
    pub message: String,
    /// `Debug` rendering; for `anyhow::Error` this includes the cause chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Capture any displayable error.
    pub fn capture<E>(err: &E) -> Self
    where
        E: Display + Debug + ?Sized,
    {
        Self {
            name: short_type_name::<E>().to_string(),
            message: err.to_string(),
            stack: Some(format!("{err:?}")),
        }
    }
}

impl Display for SerializedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// `anyhow::Error` rather than `anyhow::error::Error`; generic parameters
/// are dropped.
fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Result of `World::execute_task`.
///
/// Task failures are reported here instead of as an engine error, so the
/// workflow decides whether a failed step aborts the run.
#[derive(Debug)]
pub struct TaskResult<T, E> {
    /// Value produced (or recalled) for the step, or the task's own error.
    pub outcome: Result<T, E>,
    /// True when the value was read back from a completed step and the task
    /// was not invoked.
    pub cached: bool,
}

impl<T, E> TaskResult<T, E> {
    pub(crate) fn fresh(outcome: Result<T, E>) -> Self {
        Self {
            outcome,
            cached: false,
        }
    }

    pub(crate) fn cached(value: T) -> Self {
        Self {
            outcome: Ok(value),
            cached: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.outcome.as_ref().err()
    }

    pub fn into_outcome(self) -> Result<T, E> {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct QuoteUnavailable;

    impl Display for QuoteUnavailable {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("quote service unavailable")
        }
    }

    #[test]
    fn test_capture_plain_error() {
        let err = SerializedError::capture(&QuoteUnavailable);
        assert_eq!(err.name, "QuoteUnavailable");
        assert_eq!(err.message, "quote service unavailable");
        assert_eq!(err.stack.as_deref(), Some("QuoteUnavailable"));
    }

    #[test]
    fn test_capture_anyhow_keeps_chain() {
        let err = anyhow::anyhow!("connection reset").context("fetching quote");
        let captured = SerializedError::capture(&err);
        assert_eq!(captured.name, "Error");
        assert_eq!(captured.message, "fetching quote");
        assert!(captured.stack.unwrap().contains("connection reset"));
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(SerializedError::new("Timeout", "took too long")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"name": "Timeout", "message": "took too long"})
        );
    }

    #[test]
    fn test_task_result_accessors() {
        let ok: TaskResult<i32, String> = TaskResult::cached(42);
        assert!(ok.is_success());
        assert!(ok.cached);
        assert_eq!(ok.value(), Some(&42));

        let failed: TaskResult<i32, String> = TaskResult::fresh(Err("boom".to_string()));
        assert!(!failed.is_success());
        assert_eq!(failed.error().map(String::as_str), Some("boom"));
        assert!(failed.into_outcome().is_err());
    }
}
