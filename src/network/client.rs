//! Peer side of the harness: connect over TLS and echo chunks back

use crate::network::error::{NetworkError, NetworkResult};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Totals from one echo run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoSummary {
    pub chunks: u64,
    pub bytes: u64,
}

/// Open a TLS connection to a harness server
pub async fn connect(
    addr: SocketAddr,
    server_name: &str,
    config: Arc<ClientConfig>,
) -> NetworkResult<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| NetworkError::ConnectionFailed(format!("{addr}: {e}")))?;
    tcp.set_nodelay(true)?;

    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| NetworkError::InvalidServerName(format!("{server_name}: {e}")))?;

    TlsConnector::from(config)
        .connect(name, tcp)
        .await
        .map_err(NetworkError::Handshake)
}

/// Read exactly `chunk_size` bytes and write them straight back, `chunks` times.
pub async fn run_echo<S>(
    stream: &mut S,
    chunk_size: usize,
    chunks: u64,
) -> NetworkResult<EchoSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];

    for chunk in 0..chunks {
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| NetworkError::ReceiveFailed(format!("chunk {chunk}: {e}")))?;
        stream
            .write_all(&buf)
            .await
            .map_err(|e| NetworkError::SendFailed(format!("chunk {chunk}: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| NetworkError::SendFailed(format!("chunk {chunk}: {e}")))?;
    }

    Ok(EchoSummary {
        chunks,
        bytes: chunks * chunk_size as u64,
    })
}
