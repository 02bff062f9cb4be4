//! Routing node daemon.

use anyhow::Result;
use overlay_network::transport::HttpTransport;
use overlay_node::config::{load_or_generate_keypair, NodeConfig};
use overlay_node::metrics::start_metrics_server;
use overlay_node::server::start_peer_server;
use overlay_node::Node;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command line arguments for the node daemon.
#[derive(Debug, StructOpt)]
#[structopt(name = "overlay-node", about = "Overlay network routing node")]
struct Opt {
    /// Path to the configuration file
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Path to the data directory
    #[structopt(short, long, parse(from_os_str))]
    data_dir: Option<PathBuf>,

    /// Listen address for peer messages, overrides the configuration file
    #[structopt(short, long)]
    listen: Option<String>,

    /// Public URL of this node, overrides the configuration file
    #[structopt(short, long)]
    url: Option<String>,

    /// Enable metrics server
    #[structopt(long)]
    metrics: bool,

    /// Metrics server address
    #[structopt(long, default_value = "127.0.0.1:9090")]
    metrics_addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let opt = Opt::from_args();

    let mut config = match &opt.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(listen) = opt.listen {
        config.listen_addr = listen;
    }
    if let Some(url) = opt.url {
        config.url = url;
    }
    if opt.metrics {
        config.metrics.enabled = true;
        config.metrics.listen_addr = opt.metrics_addr;
    }

    let data_dir = opt.data_dir.unwrap_or_else(|| {
        let mut dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.push("overlay-node");
        dir
    });
    std::fs::create_dir_all(&data_dir)?;

    let keypair = load_or_generate_keypair(data_dir.join("node.key"))?;
    let listen_addr: SocketAddr = config.listen_addr.parse()?;
    let metrics = config.metrics.clone();

    let transport = Arc::new(HttpTransport::new(config.protocol.communication_timeout()));
    let node = Arc::new(Node::new(config, keypair, transport)?);
    info!("Node ID: {}", node.node_id());

    if metrics.enabled {
        let metrics_addr: SocketAddr = metrics.listen_addr.parse()?;
        start_metrics_server(metrics_addr).await?;
        info!("Metrics server listening on {}", metrics_addr);
    }

    start_peer_server(listen_addr, node.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = node.spawn_tasks(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if shutdown_tx.send(true).is_err() {
        warn!("Background tasks already stopped");
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task failed: {}", e);
        }
    }

    Ok(())
}
