//! CLI entry point for the device simulations.
//!
//! # Usage
//!
//! ```bash
//! tickit-devices --config config/eiger.toml
//! tickit-devices --log-level debug
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use tickit_devices::config::{DEFAULT_CONFIG_PATH, SimConfig};
use tickit_devices::logging;
use tickit_devices::sim_server::EigerComponent;
use tokio::signal;

#[derive(Parser)]
#[command(name = "tickit-devices")]
#[command(about = "Simulated Eiger detector with SIMPLON REST control and frame streaming", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SimConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    config.validate().map_err(|e| anyhow!(e))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    tracing::info!("Starting {}", config.application.name);

    let device = config
        .eiger
        .build_device()
        .context("invalid initial detector settings")?;
    let eiger = EigerComponent::launch(device, &config.eiger.component)
        .await
        .context("failed to launch Eiger component")?;

    signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested");
    eiger.shutdown().await;

    Ok(())
}
