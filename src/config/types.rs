use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default in-flight window, in chunks
pub const DEFAULT_WINDOW: usize = 2;

/// Whether the receiver compares inbound chunks to the reference payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Only the byte count of each chunk is checked
    Off,
    /// Every chunk is compared byte-for-byte
    #[default]
    On,
}

impl std::str::FromStr for VerifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(VerifyMode::On),
            "off" | "false" | "0" => Ok(VerifyMode::Off),
            other => Err(format!("expected on|off, got {other:?}")),
        }
    }
}

/// What the receiver does after logging an integrity mismatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    #[default]
    Continue,
    Terminate,
}

impl std::str::FromStr for MismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continue" => Ok(MismatchPolicy::Continue),
            "terminate" => Ok(MismatchPolicy::Terminate),
            other => Err(format!("expected continue|terminate, got {other:?}")),
        }
    }
}

/// Where the server certificate and private key come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CertSource {
    /// PEM certificate chain and PEM private key on disk
    Files { cert_path: PathBuf, key_path: PathBuf },
    /// Generate a throwaway self-signed certificate for these host names
    SelfSigned { hosts: Vec<String> },
}

impl Default for CertSource {
    fn default() -> Self {
        CertSource::SelfSigned {
            hosts: vec!["localhost".to_string()],
        }
    }
}

/// Root configuration for the TLS harness server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Address the TLS listener binds to
    pub listen_addr: SocketAddr,
    /// Chunk size C in bytes
    pub chunk_size: usize,
    /// In-flight window W in chunks
    pub window: usize,
    pub verify: VerifyMode,
    pub on_mismatch: MismatchPolicy,
    /// Stop each direction after this many chunks; `None` runs until the peer goes away
    pub chunk_limit: Option<u64>,
    pub tls: CertSource,
    pub handshake_timeout_ms: u64,
    /// How long shutdown waits for sessions to drain
    pub shutdown_grace_ms: u64,
    /// Prometheus listener; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
    pub log_filter: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 10248)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            window: DEFAULT_WINDOW,
            verify: VerifyMode::default(),
            on_mismatch: MismatchPolicy::default(),
            chunk_limit: None,
            tls: CertSource::default(),
            handshake_timeout_ms: 10_000,
            shutdown_grace_ms: 5_000,
            metrics_addr: None,
            log_filter: "duplex_harness=info".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Configuration for the broadcast relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    /// HTTP path accepting WebSocket upgrades
    pub path: String,
    /// Files served for every other path, e.g. a chat page
    pub static_dir: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            path: "/chat".to_string(),
            static_dir: None,
            log_filter: "duplex_harness=info,tower_http=info".to_string(),
        }
    }
}
