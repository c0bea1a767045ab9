//! Price feeder entry point.

use anyhow::{Context, Result};
use clap::Parser;
use price_feeder::chain::LocalChain;
use price_feeder::config::Config;
use price_feeder::history::PriceHistory;
use price_feeder::oracle::{Oracle, PricePublisher};
use price_feeder::server;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "price-feeder", about = "Price oracle feeder")]
struct Cli {
    /// Path to the TOML configuration file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    info!("price feeder starting");
    info!("  pairs: {}", config.currency_pairs.len());
    info!("  history db: {}", config.history_db.display());
    info!("  listen: {}", config.server.listen_addr);

    // passed through to the external signing collaborator
    if std::env::var("PRICE_FEEDER_PASS").is_err() {
        debug!("PRICE_FEEDER_PASS not set; keyring will prompt if signing is required");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            return;
        }
        info!("shutdown requested, finishing current tick");
        let _ = shutdown_tx.send(true);
    });

    let publisher = PricePublisher::new();
    if config.enable_server {
        let server_config = config.server.clone();
        let server_publisher = publisher.clone();
        let server_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(err) =
                server::run_server(server_config, server_publisher, server_shutdown).await
            {
                error!("status server failed: {err}");
            }
        });
    }

    let history =
        PriceHistory::open(&config.history_db).context("failed to open history store")?;
    let oracle = Oracle::new(config, LocalChain::default(), publisher, history)
        .context("failed to initialize oracle")?;

    oracle.run(shutdown_rx).await
}
