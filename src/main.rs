//! Gate.io futures level grid: market IOC entries at fixed offsets from a base price
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

mod broker;
mod closer;
mod config;
mod contract;
mod exchange;
mod level;
mod orchestrator;
mod symbol;
#[cfg(test)]
mod test_support;
mod throttle;

use config::BotConfig;
use exchange::{GateAuth, GateConnector, GateEndpoints};
use orchestrator::GridBot;

#[derive(Parser, Debug)]
#[command(name = "gate_level_grid", about = "Level-triggered futures grid bot for Gate.io")]
struct Args {
    /// Config file (.json for the web document, TOML otherwise)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Use the futures testnet regardless of the config file
    #[arg(long)]
    testnet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).with_target(false).init();
    let args = Args::parse();

    let mut config = BotConfig::from_file(&args.config)?;
    config.require_credentials()?;
    if args.testnet {
        config.testnet = true;
    }

    let endpoints = GateEndpoints::select(config.testnet);
    info!("═══ Gate level grid: {} symbols @ {} ═══", config.symbols.len(), endpoints.host);

    let auth = GateAuth::new(config.api_key.clone(), config.api_secret.clone());
    let connector = Arc::new(GateConnector::new(endpoints, auth));
    let bot = GridBot::new(config, connector)?;

    tokio::select! {
        result = bot.run() => {
            if let Err(e) = result {
                error!("Bot error: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }
    info!("Bot stopped");
    Ok(())
}
