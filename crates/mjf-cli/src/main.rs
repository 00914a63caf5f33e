use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mjf_storage::OfferStore;
use mjf_sync::{Pipeline, Scheduler, SyncConfig};
use mjf_web::AppState;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "mjf-cli")]
#[command(about = "Manfred job fetcher: poll, enrich and notify")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the scheduler and status server (default)
    Run,
    /// Run a single pipeline cycle and print its report
    Sync,
    /// Run the notification cleanup job once
    Cleanup,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mjf_sync=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
        Commands::Sync => {
            let pipeline = Pipeline::from_config(&config).await?;
            let report = pipeline.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Cleanup => {
            let pipeline = Pipeline::from_config(&config).await?;
            let summary = pipeline.run_cleanup().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            let store = OfferStore::connect(&config.database_url)
                .await
                .with_context(|| format!("opening database {}", config.database_url))?;
            store.migrate().await.context("applying migrations")?;
            info!(database = %config.database_url, "migrations applied");
        }
    }

    Ok(())
}

async fn run(config: SyncConfig) -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(&config).await?);
    let scheduler = Arc::new(Scheduler::new(
        pipeline.clone(),
        config.fetch_interval(),
        config.cleanup_cron.clone(),
    ));

    let state = AppState::new(pipeline.store().clone(), scheduler.status());
    let bind = config.status_bind.clone();
    tokio::spawn(async move {
        if let Err(err) = mjf_web::serve(&bind, state).await {
            let message = format!("{err:#}");
            error!(error = %message, "status server stopped");
        }
    });

    let mut jobs = scheduler.start().await?;
    info!("running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    info!("shutting down");
    jobs.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
