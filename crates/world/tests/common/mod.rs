//! Shared PostgreSQL fixtures.
//!
//! Every test gets its own schema (through `search_path`) so tables and the
//! migration ledger never collide between tests running in parallel.
//! Without `DATABASE_URL` the fixtures return `None` and the test is skipped.

#![allow(dead_code)]

use noetl_world::config::DatabaseConfig;
use noetl_world::db::DbPool;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::postgres::PgPoolOptions;

pub struct TestDb {
    pub pool: DbPool,
    admin: DbPool,
    schema: String,
}

impl TestDb {
    /// Drop the schema and everything in it.
    pub async fn teardown(self) {
        self.pool.close().await;
        let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&self.admin)
            .await;
        self.admin.close().await;
    }
}

pub async fn isolated_db(label: &str) -> Option<TestDb> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set - skipping {label}");
        return None;
    };

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    let schema = format!("world_test_{label}_{suffix}");

    let config = DatabaseConfig::from_url(url);
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(config.connect_options().expect("connect options"))
        .await
        .expect("admin pool");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create schema");

    let options = config
        .connect_options()
        .expect("connect options")
        .options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("schema pool");

    Some(TestDb {
        pool,
        admin,
        schema,
    })
}

/// True when `table` resolves in the test schema.
pub async fn table_exists(pool: &DbPool, table: &str) -> bool {
    let row: (Option<String>,) = sqlx::query_as("SELECT to_regclass($1)::TEXT")
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("to_regclass");
    row.0.is_some()
}
