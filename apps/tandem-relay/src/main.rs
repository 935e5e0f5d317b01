mod cli;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use tandem_relay::{serve, Config, RelayHub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to WARN level if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.apply(Config::from_env());
    info!(
        "Starting tandem relay on {} (heartbeat timeout {}s)",
        config.listen_addr(),
        config.heartbeat_timeout.as_secs()
    );

    let hub = RelayHub::new();
    let _monitor = hub.spawn_heartbeat_monitor(config.monitor_interval, config.heartbeat_timeout);

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    info!("Server listening on {}", listener.local_addr()?);

    serve(listener, hub).await.context("relay server failed")?;
    Ok(())
}
