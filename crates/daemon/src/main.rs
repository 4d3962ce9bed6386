//! CraftCloud Daemon
//!
//! Background sweeper: suspends expired demo servers and resumes
//! provisioning jobs that stalled before their first start.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use craftcloud_common::{Database, PanelClient, ProvisionConfig, Provisioner};

mod config;
mod sweeper;

use config::DaemonConfig;
use sweeper::Sweeper;

#[derive(Parser)]
#[command(name = "craftcloudd")]
#[command(about = "CraftCloud daemon - demo expiry and provisioning sweeps")]
#[command(version)]
struct Cli {
    /// Configuration file path (default ~/.craftcloud/daemon.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("CraftCloud daemon v{}", craftcloud_common::VERSION);

    let config_path = cli.config.unwrap_or_else(DaemonConfig::default_path);
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    config.panel.apply_env();

    tokio::fs::create_dir_all(&config.store_path).await?;

    let db = Database::open(config.db_path())?;
    let panel = Arc::new(PanelClient::new(config.panel.clone())?);
    let provisioner = Arc::new(Provisioner::new(
        db.clone(),
        panel.clone(),
        ProvisionConfig::default(),
    ));
    let sweeper = Sweeper::new(db, panel, provisioner, config.sweep.clone());

    if cli.once {
        let report = sweeper.sweep_once(chrono::Utc::now()).await?;
        info!("Sweep finished: {:?}", report);
        return Ok(());
    }

    info!(
        "Sweeping {} against {}",
        config.db_path().display(),
        config.panel.base_url
    );

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = sweeper.run() => {}
    }

    info!("Daemon shutdown complete");
    Ok(())
}
