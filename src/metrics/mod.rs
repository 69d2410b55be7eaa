//! Metrics and observability module
//!
//! Prometheus-compatible metrics for the TLS harness.
//!
//! Key metrics exposed:
//! - Chunk operations (sent, received) and byte totals
//! - Integrity failures, kept apart from transport failures
//! - Session lifecycle (started, ended by outcome, active)
//! - Time the sender spends waiting on the backpressure gate

pub mod exporter;
pub mod recorder;

pub use exporter::{start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::{
    init_metrics, record_chunk_received, record_chunk_sent, record_gate_wait,
    record_handshake_failed, record_integrity_failure, record_session_ended,
    record_session_started,
};
