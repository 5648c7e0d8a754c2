#![forbid(unsafe_code)]
//! The VanillaChain ledger node.

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use vanillachain::config::load_config;
use vanillachain::node::Node;

#[derive(Parser)]
#[command(name = "vanilla-node", about = "Single-authority ledger node")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.network.port = port;
    }

    let node = Arc::new(Node::init(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    node.start(shutdown_rx).await?;
    info!("Node stopped");
    Ok(())
}
