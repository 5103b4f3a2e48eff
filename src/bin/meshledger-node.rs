#![forbid(unsafe_code)]
//! MeshLedger node: serves the ledger API and replicates with the reference node

use clap::Parser;
use meshledger::config::load_config;
use meshledger::logging::init_logging;
use meshledger::node::Node;
use meshledger::pubsub::LocalBus;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// API port, overriding the configuration and API_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Run as a peer of the reference node
    #[arg(long)]
    peer: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.network.api_port = Some(port);
    }
    if cli.peer {
        config.network.peer = true;
    }

    init_logging(config.log_format()?, &config.logging.level)?;

    let node = Arc::new(Node::new(config, Arc::new(LocalBus::default()))?);
    let addr = node.start().await?;
    tracing::info!(%addr, "listening");

    node.shutdown_controller().wait_for_signal().await;
    node.shutdown().await;

    Ok(())
}
