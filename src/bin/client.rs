use anyhow::{Context, Result};
use clap::Parser;
use duplex_harness::network::{self, tls::ClientTrust};
use duplex_harness::telemetry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::AsyncWriteExt;

/// Echo peer for the harness server: reads each chunk and writes it back.
#[derive(Parser, Debug)]
#[command(name = "harness-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Harness server address
    #[arg(long, default_value = "127.0.0.1:10248")]
    addr: SocketAddr,

    /// Name to verify the server certificate against
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Chunk size in bytes; must match the server
    #[arg(long, default_value_t = duplex_harness::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Number of chunks to echo before closing
    #[arg(long, default_value_t = 100)]
    chunks: u64,

    /// CA certificate (PEM) to trust
    #[arg(long, conflicts_with = "insecure")]
    ca: Option<PathBuf>,

    /// Skip certificate verification (self-signed servers)
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing("duplex_harness=info,harness_client=info");

    let trust = match (cli.insecure, cli.ca) {
        (true, _) => ClientTrust::Insecure,
        (false, Some(path)) => ClientTrust::Pem(path),
        (false, None) => ClientTrust::System,
    };
    let config = network::client_config(trust).context("building TLS client config")?;

    let mut stream = network::connect(cli.addr, &cli.server_name, config)
        .await
        .with_context(|| format!("connecting to {}", cli.addr))?;

    let started = Instant::now();
    let summary = network::run_echo(&mut stream, cli.chunk_size, cli.chunks)
        .await
        .context("echo failed")?;
    let _ = stream.shutdown().await;

    let elapsed = started.elapsed();
    tracing::info!(
        chunks = summary.chunks,
        bytes = summary.bytes,
        "Echoed in {:?} ({:.1} MiB/s)",
        elapsed,
        summary.bytes as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
