//! Diagnostic log records attached to a run.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::UnknownVariant;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(UnknownVariant {
                kind: "log level",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = UnknownVariant;

    fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        s.parse()
    }
}

/// Database log record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct WorkflowLog {
    pub id: i64,
    pub run_id: String,
    pub step_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Request to append a log record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewLog {
    pub run_id: String,
    pub step_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("fatal".parse::<LogLevel>().is_err());
        assert!(LogLevel::Error > LogLevel::Debug);
    }
}
