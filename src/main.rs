//! Portfolio Rebalancer - Main Entry Point
//!
//! Runs one rebalancing cycle over every active user, or records the
//! balance history of every connected account. Scheduling is left to cron.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use portfolio_rebalancer::config::loader::load_config;
use portfolio_rebalancer::{credentials, notify};
use portfolio_rebalancer::{
    LiveAdapterFactory, PgStore, PortfolioOrchestrator, StrategyRegistry, UserOutcome,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebalance every active portfolio once
    Run {
        /// Size orders without submitting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Record the current balance of every connected account
    Snapshot,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let mut config = load_config(Some(&args.config)).context("loading configuration")?;

    // Initialize logging
    let level = parse_level(args.log_level.as_deref().unwrap_or(&config.settings.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting portfolio rebalancer");
    info!("Configuration file: {}", args.config);

    if let Command::Run { dry_run: true } = args.command {
        config.rebalance.dry_run = true;
    }
    if config.credentials.encryption_key.is_none() {
        config.credentials.encryption_key = std::env::var("ENCRYPTION_KEY").ok();
    }
    let credential_store = credentials::from_config(&config.credentials)?;

    let database = config
        .database
        .as_ref()
        .context("a [database] section is required")?;
    let store = PgStore::connect(database).await?;

    let timeout = Duration::from_secs(config.settings.request_timeout_seconds);
    let notifier = notify::from_config(&config.notifier, timeout)?;
    let factory = LiveAdapterFactory::new(
        config.exchanges.clone(),
        &config.rebalance.quote_asset,
        timeout,
    );

    let orchestrator = PortfolioOrchestrator::new(
        Arc::new(store),
        Arc::from(credential_store),
        Arc::new(factory),
        Arc::from(notifier),
        Arc::new(StrategyRegistry::with_builtins()),
        Arc::new(config.rebalance.clone()),
    );

    match args.command {
        Command::Run { .. } => {
            let report = orchestrator.run_cycle().await?;
            for user in &report.users {
                match &user.outcome {
                    UserOutcome::Completed(markets) => info!(
                        "User {} on {}: {} markets processed",
                        user.user_id,
                        user.exchange_name,
                        markets.len()
                    ),
                    other => info!("User {} on {}: {:?}", user.user_id, user.exchange_name, other),
                }
            }
        }
        Command::Snapshot => {
            orchestrator.snapshot_balances().await?;
        }
    }

    info!("Done");
    Ok(())
}
