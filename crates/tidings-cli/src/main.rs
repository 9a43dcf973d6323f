//! # Tidings CLI
//!
//! Subscribes to a realtime event stream and prints every event as one
//! JSON line on stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Explicit stream URL (loopback is allowed for a loopback origin)
//! TIDINGS_STREAM_URL=ws://127.0.0.1:8000/ws TIDINGS_ORIGIN=http://127.0.0.1 tidings
//!
//! # Derive the stream URL from the API base
//! TIDINGS_API_URL=https://api.example.com TIDINGS_ORIGIN=https://app.example.com tidings
//!
//! # Run with a config file
//! TIDINGS_CONFIG=/path/to/tidings.toml tidings
//! ```

mod config;

use anyhow::{anyhow, bail, Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tidings_client::RealtimeChannel;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if config.metrics.enabled {
        start_metrics_server(config.metrics.port)?;
    }

    tidings_client::install_shared(RealtimeChannel::new(&config.channel()))
        .map_err(|_| anyhow!("Shared channel already initialized"))?;

    let subscription = tidings_client::add_listener(|event| println!("{event}"));

    if tidings_client::connect().await.is_none() {
        let status = tidings_client::shared().status().await;
        if status.is_some_and(|s| s.disabled) {
            bail!("No usable realtime endpoint, set TIDINGS_STREAM_URL or TIDINGS_API_URL");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    subscription.dispose();
    tidings_client::close_connection();

    if let Some(status) = tidings_client::shared().status().await {
        info!(
            attempts = status.stats.attempts_started,
            opened = status.stats.connections_opened,
            events = status.stats.events_delivered,
            decode_errors = status.stats.decode_errors,
            "Channel closed"
        );
    }

    Ok(())
}

/// Install the Prometheus exporter and describe the channel metrics.
fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start metrics exporter")?;

    tidings_client::metrics::describe_metrics();
    info!("Metrics server listening on {}", addr);
    Ok(())
}
