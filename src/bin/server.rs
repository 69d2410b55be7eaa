use anyhow::{Context, Result};
use clap::Parser;
use duplex_harness::config::{CertSource, HarnessConfig, MismatchPolicy, VerifyMode};
use duplex_harness::metrics::{start_metrics_server, MetricsConfig};
use duplex_harness::network::{tls, Acceptor};
use duplex_harness::session::Shutdown;
use duplex_harness::telemetry;
use std::net::SocketAddr;
use std::path::PathBuf;

/// TLS integrity and throughput harness server.
#[derive(Parser, Debug)]
#[command(name = "harness-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, default_value = "harness.toml")]
    config: PathBuf,

    /// Listen address (overrides config)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// In-flight window in chunks
    #[arg(long)]
    window: Option<usize>,

    /// Compare received chunks to the reference payload: on|off
    #[arg(long)]
    verify: Option<VerifyMode>,

    /// Action after an integrity mismatch: continue|terminate
    #[arg(long)]
    on_mismatch: Option<MismatchPolicy>,

    /// Stop each session after this many chunks in each direction
    #[arg(long)]
    chunk_limit: Option<u64>,

    /// PEM certificate chain (requires --key)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key (requires --cert)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Prometheus listener address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

impl Cli {
    fn apply(self, config: &mut HarnessConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(verify) = self.verify {
            config.verify = verify;
        }
        if let Some(policy) = self.on_mismatch {
            config.on_mismatch = policy;
        }
        if self.chunk_limit.is_some() {
            config.chunk_limit = self.chunk_limit;
        }
        if let (Some(cert_path), Some(key_path)) = (self.cert, self.key) {
            config.tls = CertSource::Files { cert_path, key_path };
        }
        if self.metrics_addr.is_some() {
            config.metrics_addr = self.metrics_addr;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HarnessConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    telemetry::init_tracing(&config.log_filter);

    if let Some(addr) = config.metrics_addr {
        start_metrics_server(MetricsConfig::with_addr(addr))
            .context("starting metrics exporter")?;
    }

    let tls_config = tls::server_config(&config.tls).context("loading TLS certificate")?;

    let shutdown = Shutdown::new();
    let acceptor = Acceptor::bind(&config, tls_config, shutdown.subscribe())
        .await
        .context("binding listener")?;

    tracing::info!(
        chunk_size = config.chunk_size,
        window = config.window,
        verify = ?config.verify,
        on_mismatch = ?config.on_mismatch,
        "Harness ready on {}",
        acceptor.local_addr()?
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received");
                shutdown.trigger();
            }
        }
    });

    acceptor.run().await.context("accept loop failed")?;
    Ok(())
}
