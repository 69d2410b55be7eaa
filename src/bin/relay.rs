use anyhow::{Context, Result};
use clap::Parser;
use duplex_harness::config::RelayConfig;
use duplex_harness::relay;
use duplex_harness::session::Shutdown;
use duplex_harness::telemetry;
use std::net::SocketAddr;
use std::path::PathBuf;

/// WebSocket broadcast relay.
#[derive(Parser, Debug)]
#[command(name = "harness-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// WebSocket path (overrides config)
    #[arg(long)]
    path: Option<String>,

    /// Directory served at `/` next to the WebSocket path
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RelayConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(path) = cli.path {
        anyhow::ensure!(path.starts_with('/'), "relay path must start with '/'");
        config.path = path;
    }
    if cli.static_dir.is_some() {
        config.static_dir = cli.static_dir;
    }

    telemetry::init_tracing(&config.log_filter);

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger();
            }
        }
    });

    relay::serve(&config, shutdown.subscribe())
        .await
        .context("relay failed")?;
    Ok(())
}
