//! CLI entry point: `supervisor`, `worker`, `migrate`, and `config`
//! subcommands over the same underlying engine.
//!
//! Boots logging, loads `.env` + CLI/environment settings, then dispatches
//! to whichever subcommand was requested.

use clap::Parser;

use articulum_engine::config::{Cli, Command};
use articulum_engine::{repository, supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Supervisor(settings) => {
            repository::run_all_migrations(&settings.database_url, settings.no_tls).await?;
            let pool = repository::connect(&settings.database_url, settings.db_pool_size, settings.no_tls)?;

            tracing::info!(
                browser_workers = settings.browser_workers,
                validation_workers = settings.validation_workers,
                "starting articulum coordination engine"
            );

            supervisor::run(settings, pool).await
        }
        Command::Worker(worker_args) => {
            let settings = worker_args.settings;
            let pool = repository::connect(&settings.database_url, settings.db_pool_size, settings.no_tls)?;

            tracing::info!(kind = ?worker_args.kind, "starting single worker");

            supervisor::run_single_worker(worker_args.kind, settings, pool).await
        }
        Command::Migrate(migrate_args) => {
            repository::run_all_migrations(&migrate_args.database_url, migrate_args.no_tls).await?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Command::Config(settings) => {
            println!("{}", settings.redacted());
            Ok(())
        }
    }
}
