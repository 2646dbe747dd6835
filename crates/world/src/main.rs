//! NoETL World admin tool
//!
//! Operates on the workflow tables of a World database: schema migrations,
//! run inspection, due-step listing and retention cleanup.

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use noetl_world::{
    config::{DatabaseConfig, WorldConfig},
    db::{create_pool, health_check},
    PgStore, World,
};

#[derive(Parser)]
#[command(name = "noetl-world")]
#[command(version, about = "NoETL durable workflow store administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (overrides DATABASE_URL and POSTGRES_* variables)
    #[arg(long)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Revert the most recently applied migration
    Rollback,

    /// Revert every applied migration
    Reset,

    /// Show the schema version and pending migrations
    Version,

    /// Show a run's status and step counts
    Status {
        /// Run identifier
        run_id: String,
    },

    /// Show where a run would resume
    Resume {
        /// Run identifier
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Only runs of this workflow
        #[arg(short, long)]
        workflow: Option<String>,

        /// Maximum number of runs
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// List scheduled steps that are due now
    Due,

    /// Delete finished runs older than the retention period
    Cleanup {
        /// Retention in days (defaults to WORLD_RETENTION_DAYS)
        #[arg(short, long)]
        days: Option<i64>,
    },
}

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,noetl_world=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct VersionReport {
    version: i64,
    latest: i64,
    pending: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let db_config = match cli.database_url {
        Some(url) => DatabaseConfig::from_url(url),
        None => DatabaseConfig::from_env()?,
    };
    let world_config = WorldConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load world config, using defaults");
        WorldConfig::default()
    });

    let pool = create_pool(&db_config).await?;
    if !health_check(&pool).await {
        anyhow::bail!("database health check failed");
    }
    let store = PgStore::new(pool);
    let runner = store.migration_runner();

    match cli.command {
        Commands::Migrate => {
            let applied = runner.run().await?;
            tracing::info!(applied, "Migrations applied");
            let version = runner.get_version().await?;
            println!("applied {applied} migration(s), schema at version {version}");
        }
        Commands::Rollback => {
            if runner.rollback().await? {
                println!("rolled back, schema at version {}", runner.get_version().await?);
            } else {
                println!("nothing to roll back");
            }
        }
        Commands::Reset => {
            let reverted = runner.reset().await?;
            println!("reverted {reverted} migration(s)");
        }
        Commands::Version => {
            let report = VersionReport {
                version: runner.get_version().await?,
                latest: runner.registry().latest_version(),
                pending: runner
                    .pending()
                    .await?
                    .iter()
                    .map(|m| format!("{} {}", m.version, m.name))
                    .collect(),
            };
            print_json(&report)?;
        }
        command => {
            let world = World::new(store, world_config);
            let outcome = run_world_command(&world, command).await;
            world.close().await;
            outcome?;
        }
    }

    Ok(())
}

async fn run_world_command(world: &World<PgStore>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Status { run_id } => print_json(&world.get_run_status(&run_id).await?),
        Commands::Resume { run_id } => print_json(&world.resume_run(&run_id).await?),
        Commands::Runs { workflow, limit } => {
            print_json(&world.list_runs(workflow.as_deref(), limit).await?)
        }
        Commands::Due => print_json(&world.due_steps(Utc::now()).await?),
        Commands::Cleanup { days } => {
            let deleted = world.cleanup(days).await?;
            println!("deleted {deleted} run(s)");
            Ok(())
        }
        Commands::Migrate | Commands::Rollback | Commands::Reset | Commands::Version => Ok(()),
    }
}
