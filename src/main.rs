use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use estate_watcher::store::{SqliteStore, TargetStore};
use estate_watcher::utils::{logging, metrics};
use estate_watcher::web::{self, AppState};
use estate_watcher::{assemble, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "estate-watcher", version, about = "Watches listing pages and reports new listings")]
struct Cli {
    /// Extra configuration file layered over config/default and config/{RUN_MODE}
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor all configured targets until interrupted
    Run,
    /// Fetch one url through the strategy chain and print the outcome
    Check {
        #[arg(long)]
        url: String,
        #[arg(long)]
        selector: Option<String>,
    },
    /// List stored targets with their last known state
    Targets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = logging::init_tracing(&config.logging)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Check { url, selector } => check(&config, &url, selector).await,
        Command::Targets => list_targets(&config).await,
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting estate-watcher");
    metrics::install_exporter(&config.metrics)?;

    let app = assemble(&config).await?;
    app.scheduler.start().await?;

    let shutdown = CancellationToken::new();
    let server = config.server.enabled.then(|| {
        let state = AppState {
            scheduler: app.scheduler.clone(),
        };
        let server_config = config.server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(&server_config, state, shutdown).await {
                error!(error = %e, "Status API stopped");
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    app.scheduler.stop().await?;
    if let Some(server) = server {
        server.await?;
    }

    let statistics = app.scheduler.statistics();
    info!(
        total_checks = statistics.total_checks,
        success_rate = statistics.success_rate,
        new_property_detections = statistics.new_property_detections,
        "Shut down cleanly"
    );
    Ok(())
}

async fn check(config: &AppConfig, url: &str, selector: Option<String>) -> Result<()> {
    let outcome = estate_watcher::app::check_once(config, url, selector).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.success {
        anyhow::bail!(
            "Check failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn list_targets(config: &AppConfig) -> Result<()> {
    let store = SqliteStore::connect(&config.database).await?;
    let targets = store.load_targets().await?;

    if targets.is_empty() {
        println!("No targets stored in {}", config.database.url);
        return Ok(());
    }

    for target in targets {
        let state = if target.is_monitoring_enabled() { "enabled" } else { "disabled" };
        let last_checked = target
            .last_checked_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<20} {:<8} checks={:<6} errors={:<4} new={:<4} last_checked={} {}",
            target.id,
            state,
            target.total_checks,
            target.error_count,
            target.new_listings_count,
            last_checked,
            target.url
        );
    }
    Ok(())
}
