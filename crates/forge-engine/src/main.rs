//! Forge engine - Entry Point
//!
//! `trade`: resolve trades on price and deadline
//! `dungeon`: run dungeon cycles
//! `claim` / `claim-all`: settle dungeon rewards by hand

use anyhow::Result;
use clap::{Parser, Subcommand};
use forge_core::{CharacterId, EnrollmentId, UserId};
use forge_engine::{AppConfig, Application};
use tracing::info;

/// Forge background resolution engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FORGE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trade worker
    Trade,
    /// Run the dungeon worker
    Dungeon,
    /// Claim one finished dungeon enrollment
    Claim {
        #[arg(long)]
        enrollment: EnrollmentId,
        #[arg(long)]
        user: UserId,
    },
    /// Claim every finished dungeon enrollment of a character
    ClaimAll {
        #[arg(long)]
        character: CharacterId,
        #[arg(long)]
        user: UserId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before the first Realtime connection.
    forge_realtime::init_crypto();

    let args = Args::parse();

    forge_telemetry::init_logging()?;

    info!("Starting forge-engine v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > FORGE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("FORGE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = AppConfig::load(&config_path)?;
    info!(backend = ?config.store.backend, "Configuration loaded");

    let app = Application::new(config)?;

    match args.command {
        Command::Trade => app.run_trade_worker().await?,
        Command::Dungeon => app.run_dungeon_worker().await?,
        Command::Claim { enrollment, user } => {
            let receipt = app.claim(enrollment, user).await?;
            info!(%enrollment, %user, reward = receipt.reward, balance = receipt.balance, "Claimed");
        }
        Command::ClaimAll { character, user } => {
            let receipt = app.claim_all(character, user).await?;
            info!(
                %character,
                %user,
                enrollments = receipt.enrollment_ids.len(),
                reward = receipt.reward,
                balance = receipt.balance,
                "Claimed"
            );
        }
    }

    Ok(())
}
