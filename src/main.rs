//! Mention Radar - chat token-mention detection pipeline
//!
//! Watches configured chat sources for token identifiers, enriches the
//! mentions with context, scores them through an external service and
//! raises alerts. Built for sustained high message rates: per-source
//! rate limiting on both sides of a priority queue keeps one noisy
//! channel from starving the rest.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use mention_radar::cli::commands;
use mention_radar::config::Config;

/// Mention Radar - token mention detection and alerting
#[derive(Parser)]
#[command(name = "radar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingestion pipeline
    Start {
        /// Log alerts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Extract token mentions from a text snippet and print them
    Scan {
        /// Text to scan
        text: String,
    },

    /// Check collaborator reachability (scorer, OCR, Telegram)
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mention_radar=info".parse().unwrap())
                .add_directive("radar=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Start { dry_run } => commands::start(&config, dry_run).await,
        Commands::Config => commands::show_config(&config),
        Commands::Scan { text } => commands::scan(&config, &text),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
