//! Error types for the NoETL World engine.
//!
//! These are engine-level failures only. Errors raised by a caller's task
//! function never surface here; they are captured into the step row and
//! returned inside a `TaskResult`.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum WorldError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict error (e.g., duplicate run id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A migration script failed; its transaction was rolled back.
    #[error("Migration {version} ({name}) failed: {message}")]
    Migration {
        version: i64,
        name: String,
        message: String,
    },

    /// The migration registry is malformed (duplicate or non-positive versions).
    #[error("Invalid migration registry: {0}")]
    InvalidMigration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine was closed
    #[error("World is closed")]
    Closed,
}

/// Result type alias using WorldError.
pub type WorldResult<T> = Result<T, WorldError>;

impl From<envy::Error> for WorldError {
    fn from(err: envy::Error) -> Self {
        WorldError::Config(err.to_string())
    }
}

impl WorldError {
    /// Shorthand for a missing run.
    pub fn run_not_found(run_id: &str) -> Self {
        WorldError::NotFound(format!("Run not found: {}", run_id))
    }

    /// Returns true if the error indicates a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorldError::NotFound(_))
    }
}
