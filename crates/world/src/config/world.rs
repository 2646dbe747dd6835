//! Engine configuration for the World orchestrator.

use serde::Deserialize;

/// Default retention window applied by `World::cleanup`.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `WORLD_`:
/// - `WORLD_RETENTION_DAYS`: Age after which terminal runs are purged (default: 30)
/// - `WORLD_AUTO_MIGRATE`: Apply pending migrations before the first operation (default: true)
#[derive(Debug, Clone, Deserialize)]
pub struct WorldConfig {
    /// Retention window in days
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Run migrations lazily on first use
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

fn default_true() -> bool {
    true
}

impl WorldConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `WORLD_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("WORLD_").from_env::<WorldConfig>()
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            auto_migrate: true,
        }
    }
}
