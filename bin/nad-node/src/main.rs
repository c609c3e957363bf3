//! NAD storage node daemon

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use nad_common::config::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_NODE_PORT};
use nad_node::{BackingStore, StorageNodeService};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nad-node")]
#[command(about = "NAD storage node: serves one backing file to gateways")]
#[command(version)]
struct Args {
    /// Backing file or device
    #[arg(short = 'd', long)]
    backing: String,

    /// gRPC listen port
    #[arg(short, long, default_value_t = DEFAULT_NODE_PORT)]
    port: u16,

    /// Media size in bytes, used when the backing file is missing or empty
    #[arg(short = 's', long)]
    media_size: Option<u64>,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0")]
    listen_host: String,

    /// Log level
    #[arg(long, default_value = "info", env = "NAD_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting NAD storage node");

    let store = BackingStore::open(&args.backing, args.media_size)
        .with_context(|| format!("failed to open backing store {}", args.backing))?;
    info!(
        "Backing store: {} ({} bytes)",
        store.path().display(),
        store.media_size()
    );

    let host: IpAddr = args
        .listen_host
        .parse()
        .with_context(|| format!("invalid listen host {}", args.listen_host))?;
    let addr = SocketAddr::new(host, args.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let service = StorageNodeService::new(store);
    let metrics = service.metrics();

    info!("Starting gRPC server on {}", addr);
    nad_node::run(service, listener, DEFAULT_MAX_MESSAGE_SIZE, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    })
    .await?;

    metrics.log_summary();
    info!("Node shut down gracefully");
    Ok(())
}
