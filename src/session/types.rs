use crate::config::{HarnessConfig, MismatchPolicy, VerifyMode};
use crate::session::error::FailureKind;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier of one connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form keeps log lines readable
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// Per-session parameters, derived from [`HarnessConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub chunk_size: usize,
    pub window: usize,
    pub verify: VerifyMode,
    pub on_mismatch: MismatchPolicy,
    pub chunk_limit: Option<u64>,
}

impl From<&HarnessConfig> for SessionSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            window: config.window,
            verify: config.verify,
            on_mismatch: config.on_mismatch,
            chunk_limit: config.chunk_limit,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

/// How a sender or receiver task left its loop without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// Chunk limit reached
    Completed,
    /// Session or process cancellation observed
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed { kind: FailureKind, reason: String },
}

impl SessionOutcome {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::Failed { kind, .. } => kind.as_str(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SessionOutcome::Failed { .. })
    }
}

/// Live counters shared by a session's two tasks
#[derive(Debug, Default)]
pub struct SessionStats {
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    integrity_failures: AtomicU64,
}

impl SessionStats {
    pub fn record_sent(&self, bytes: usize) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent.load(Ordering::Relaxed)
    }

    pub fn chunks_received(&self) -> u64 {
        self.chunks_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn integrity_failures(&self) -> u64 {
        self.integrity_failures.load(Ordering::Relaxed)
    }
}

/// Final accounting of one session, logged when the session ends
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub peer: Option<SocketAddr>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub integrity_failures: u64,
    pub tokens_acquired: u64,
    pub tokens_released: u64,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    /// Received throughput in bytes per second
    pub fn throughput_bps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.bytes_received as f64 / secs
        } else {
            0.0
        }
    }
}
