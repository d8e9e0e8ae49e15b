//! Grapevine node binary
//!
//! Loads configuration from the environment, applies positional CLI
//! overrides for running several overlay instances side by side, and runs
//! the node until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use grapevine_node::config::Config;
use grapevine_node::node::GrapevineNode;
use grapevine_directory::InMemoryDirectory;
use grapevine_gossip::InMemoryHintBus;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grapevine-node")]
#[command(about = "Adaptive service discovery and routing node")]
struct Args {
    /// Override the DHT port (lets several nodes share one host)
    dht_port: Option<u16>,

    /// Override the API port
    api_port: Option<u16>,

    /// Comma-separated bootstrap endpoints
    bootstrap: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(dht_port) = args.dht_port {
        config.grape.dht_port = dht_port;
    }
    if let Some(api_port) = args.api_port {
        config.grape.api_port = api_port;
    }
    if let Some(bootstrap) = args.bootstrap {
        config.grape.bootstrap = bootstrap
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    // Fail fast: nothing is spawned on an invalid configuration
    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("starting grapevine node");
    info!("  dht port:   {}", config.grape.dht_port);
    info!("  api port:   {}", config.grape.api_port);
    info!(
        "  bootstrap:  {}",
        if config.grape.bootstrap.is_empty() {
            "none (first node)".to_string()
        } else {
            config.grape.bootstrap.join(", ")
        }
    );
    info!("  concurrency: {}", config.grape.concurrency);
    info!(
        "  worker:     {} @ {}",
        config.worker.service_name,
        config.worker_endpoint()
    );

    let directory = Arc::new(InMemoryDirectory::new());
    let transport = Arc::new(InMemoryHintBus::new());
    let peer_id = format!("node-{}", config.grape.dht_port);

    let node = GrapevineNode::new(config, directory, transport, peer_id);
    node.start().await?;
    info!("node is ready, press Ctrl+C to stop");

    wait_for_signal().await;

    node.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl+C");
}
