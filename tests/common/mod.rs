//! Shared fixtures: a harness server on loopback with a throwaway certificate

#![allow(dead_code)]

use duplex_harness::config::HarnessConfig;
use duplex_harness::network::{self, tls, Acceptor, ClientTrust, NetworkResult};
use duplex_harness::session::{SessionRegistry, SessionReport, Shutdown};
use rustls::pki_types::CertificateDer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub reports: mpsc::UnboundedReceiver<SessionReport>,
    pub registry: Arc<SessionRegistry>,
    pub handle: JoinHandle<NetworkResult<()>>,
    cert: CertificateDer<'static>,
}

impl TestServer {
    pub async fn start(mut config: HarnessConfig) -> Self {
        duplex_harness::telemetry::init_tracing("duplex_harness=debug");

        let generated = tls::self_signed(&["localhost".to_string()]).unwrap();
        let tls_config =
            tls::server_config_from_der(vec![generated.cert_der.clone()], generated.key())
                .unwrap();

        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        let shutdown = Shutdown::new();
        let (tx, reports) = mpsc::unbounded_channel();

        let acceptor = Acceptor::bind(&config, tls_config, shutdown.subscribe())
            .await
            .unwrap()
            .with_report_sink(tx);
        let addr = acceptor.local_addr().unwrap();
        let registry = acceptor.registry();
        let handle = tokio::spawn(acceptor.run());

        Self {
            addr,
            shutdown,
            reports,
            registry,
            handle,
            cert: generated.cert_der,
        }
    }

    pub async fn connect(&self) -> TlsStream<TcpStream> {
        let config =
            network::client_config(ClientTrust::Der(vec![self.cert.clone()])).unwrap();
        network::connect(self.addr, "localhost", config).await.unwrap()
    }

    pub async fn next_report(&mut self) -> SessionReport {
        tokio::time::timeout(Duration::from_secs(10), self.reports.recv())
            .await
            .expect("no session report within 10s")
            .expect("report channel closed")
    }

    /// Trigger shutdown and wait for the accept loop to return
    pub async fn stop(self) -> NetworkResult<()> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("acceptor did not stop")
            .expect("acceptor task panicked")
    }
}

pub fn config(chunk_size: usize, window: usize, chunk_limit: Option<u64>) -> HarnessConfig {
    HarnessConfig {
        chunk_size,
        window,
        chunk_limit,
        shutdown_grace_ms: 2_000,
        ..Default::default()
    }
}

/// Read until nothing arrives for `quiet`
pub async fn drain_until_quiet(stream: &mut TlsStream<TcpStream>, quiet: Duration) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        match tokio::time::timeout(quiet, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
        }
    }
    received
}
