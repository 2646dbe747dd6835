//! Applies and reverts migrations against PostgreSQL.
//!
//! Each migration runs inside its own transaction together with its ledger
//! write, so a failing script leaves `schema_migrations` exactly as it was.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::models::SchemaMigration;
use crate::db::DbPool;
use crate::error::{WorldError, WorldResult};

use super::registry::{Migration, MigrationRegistry};

const CREATE_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    BIGINT PRIMARY KEY,
    name       TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Migration runner bound to a pool and a registry.
#[derive(Clone)]
pub struct MigrationRunner {
    pool: DbPool,
    registry: Arc<MigrationRegistry>,
}

impl MigrationRunner {
    pub fn new(pool: DbPool, registry: Arc<MigrationRegistry>) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    async fn ensure_ledger(&self) -> WorldResult<()> {
        sqlx::query(CREATE_LEDGER).execute(&self.pool).await?;
        Ok(())
    }

    /// Ledger rows, ascending by version.
    pub async fn applied(&self) -> WorldResult<Vec<SchemaMigration>> {
        self.ensure_ledger().await?;
        let rows = sqlx::query_as::<_, SchemaMigration>(
            r#"
            SELECT version, name, applied_at
            FROM schema_migrations
            ORDER BY version ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Registered migrations not yet recorded in the ledger.
    pub async fn pending(&self) -> WorldResult<Vec<Migration>> {
        let applied: Vec<i64> = self.applied().await?.iter().map(|m| m.version).collect();
        Ok(self.registry.pending(&applied).into_iter().cloned().collect())
    }

    /// Apply every pending migration in ascending version order.
    ///
    /// Returns the number applied; 0 when the schema is already current.
    pub async fn run(&self) -> WorldResult<usize> {
        let pending = self.pending().await?;
        if pending.is_empty() {
            debug!("Schema is up to date");
            return Ok(0);
        }

        for migration in &pending {
            self.apply(migration).await?;
        }

        info!(
            applied = pending.len(),
            version = self.registry.latest_version(),
            "Migrations applied"
        );
        Ok(pending.len())
    }

    async fn apply(&self, migration: &Migration) -> WorldResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(migration.up))
            .await
            .map_err(|e| script_error(migration, e))?;

        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(version = migration.version, name = migration.name, "Migration applied");
        Ok(())
    }

    async fn revert(&self, migration: &Migration) -> WorldResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(migration.down))
            .await
            .map_err(|e| script_error(migration, e))?;

        sqlx::query("DELETE FROM schema_migrations WHERE version = $1")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(version = migration.version, name = migration.name, "Migration reverted");
        Ok(())
    }

    /// Revert the highest applied migration.
    ///
    /// Returns `false` when nothing is applied.
    pub async fn rollback(&self) -> WorldResult<bool> {
        let applied = self.applied().await?;
        let Some(latest) = applied.last() else {
            debug!("Nothing to roll back");
            return Ok(false);
        };

        let migration = self.registry.get(latest.version).ok_or_else(|| {
            WorldError::InvalidMigration(format!(
                "applied version {} ({}) is not registered",
                latest.version, latest.name
            ))
        })?;
        self.revert(migration).await?;
        Ok(true)
    }

    /// Highest applied version, or 0.
    pub async fn get_version(&self) -> WorldResult<i64> {
        self.ensure_ledger().await?;
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.unwrap_or(0))
    }

    /// Revert every applied migration, highest version first.
    ///
    /// Returns the number reverted.
    pub async fn reset(&self) -> WorldResult<usize> {
        let mut reverted = 0;
        while self.rollback().await? {
            reverted += 1;
        }
        info!(reverted, "Schema reset");
        Ok(reverted)
    }
}

fn script_error(migration: &Migration, err: sqlx::Error) -> WorldError {
    WorldError::Migration {
        version: migration.version,
        name: migration.name.to_string(),
        message: err.to_string(),
    }
}
