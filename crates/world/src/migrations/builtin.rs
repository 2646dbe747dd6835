//! Schema shipped with the engine.
//!
//! Every script is written to be re-runnable: a failed migration is retried
//! from scratch on the next `run()`.

use super::registry::Migration;

const CREATE_WORKFLOW_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_runs (
    id           TEXT PRIMARY KEY,
    workflow_id  TEXT NOT NULL,
    input        JSONB,
    output       JSONB,
    error        JSONB,
    status       TEXT NOT NULL
                 CHECK (status IN ('running', 'completed', 'failed', 'paused')),
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_workflow_runs_workflow_id
    ON workflow_runs (workflow_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_workflow_runs_status_created
    ON workflow_runs (status, created_at);

CREATE TABLE IF NOT EXISTS workflow_steps (
    run_id        TEXT NOT NULL REFERENCES workflow_runs (id) ON DELETE CASCADE,
    step_id       TEXT NOT NULL,
    status        TEXT NOT NULL
                  CHECK (status IN ('pending', 'running', 'completed', 'failed', 'scheduled')),
    input         JSONB,
    output        JSONB,
    error         JSONB,
    started_at    TIMESTAMPTZ,
    completed_at  TIMESTAMPTZ,
    scheduled_for TIMESTAMPTZ,
    task_data     JSONB,
    retry_count   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (run_id, step_id)
);

CREATE INDEX IF NOT EXISTS idx_workflow_steps_scheduled
    ON workflow_steps (scheduled_for)
    WHERE status = 'scheduled';
"#;

const DROP_WORKFLOW_TABLES: &str = r#"
DROP TABLE IF EXISTS workflow_steps;
DROP TABLE IF EXISTS workflow_runs;
"#;

const CREATE_WORKFLOW_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_logs (
    id          BIGSERIAL PRIMARY KEY,
    run_id      TEXT NOT NULL REFERENCES workflow_runs (id) ON DELETE CASCADE,
    step_id     TEXT,
    level       TEXT NOT NULL CHECK (level IN ('debug', 'info', 'warn', 'error')),
    message     TEXT NOT NULL,
    data        JSONB,
    "timestamp" TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_workflow_logs_run
    ON workflow_logs (run_id, "timestamp");
"#;

const DROP_WORKFLOW_LOGS: &str = r#"
DROP TABLE IF EXISTS workflow_logs;
"#;

/// Migrations applied by a default `World`.
pub const BUILTIN_MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "create_workflow_tables",
        CREATE_WORKFLOW_TABLES,
        DROP_WORKFLOW_TABLES,
    ),
    Migration::new(
        2,
        "create_workflow_logs",
        CREATE_WORKFLOW_LOGS,
        DROP_WORKFLOW_LOGS,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_versions_are_contiguous() {
        for (idx, migration) in BUILTIN_MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, idx as i64 + 1);
        }
    }

    #[test]
    fn test_builtin_scripts_are_rerunnable() {
        for migration in BUILTIN_MIGRATIONS {
            for line in migration.up.lines().map(str::trim) {
                if line.starts_with("CREATE TABLE") || line.starts_with("CREATE INDEX") {
                    assert!(line.contains("IF NOT EXISTS"), "{}: {}", migration.name, line);
                }
            }
            for line in migration.down.lines().map(str::trim) {
                if line.starts_with("DROP") {
                    assert!(line.contains("IF EXISTS"), "{}: {}", migration.name, line);
                }
            }
        }
    }
}
