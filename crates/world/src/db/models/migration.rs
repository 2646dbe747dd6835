//! Migration ledger row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row of `schema_migrations`: one applied migration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}
