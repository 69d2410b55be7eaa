//! Metrics recorder for harness sessions
//!
//! All functions are cheap no-ops until a recorder is installed.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!("harness_chunks_sent_total", "Total number of chunks written");
    describe_counter!(
        "harness_chunks_received_total",
        "Total number of chunks fully read back"
    );
    describe_counter!("harness_bytes_sent_total", "Total payload bytes written");
    describe_counter!("harness_bytes_received_total", "Total payload bytes read");
    describe_counter!(
        "harness_integrity_failures_total",
        "Chunks whose content differed from the reference payload"
    );
    describe_counter!(
        "harness_handshake_failures_total",
        "TLS handshakes that failed or timed out"
    );

    describe_counter!("harness_sessions_started_total", "Sessions started");
    describe_counter!(
        "harness_sessions_ended_total",
        "Sessions ended, labelled by outcome"
    );
    describe_gauge!("harness_active_sessions", "Sessions currently running");

    describe_histogram!(
        "harness_gate_wait_seconds",
        "Time the sender waited for a window token"
    );
    describe_histogram!("harness_session_duration_seconds", "Session lifetime");
}

// ============== Chunk Operations ==============

/// Record a chunk written to the connection
pub fn record_chunk_sent(chunk_size: usize) {
    counter!("harness_chunks_sent_total").increment(1);
    counter!("harness_bytes_sent_total").increment(chunk_size as u64);
}

/// Record a chunk fully read from the connection
pub fn record_chunk_received(chunk_size: usize) {
    counter!("harness_chunks_received_total").increment(1);
    counter!("harness_bytes_received_total").increment(chunk_size as u64);
}

pub fn record_integrity_failure() {
    counter!("harness_integrity_failures_total").increment(1);
}

pub fn record_gate_wait(waited: Duration) {
    histogram!("harness_gate_wait_seconds").record(waited.as_secs_f64());
}

// ============== Session Operations ==============

pub fn record_handshake_failed(reason: &str) {
    counter!("harness_handshake_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Record a session starting
pub fn record_session_started() {
    counter!("harness_sessions_started_total").increment(1);
    gauge!("harness_active_sessions").increment(1.0);
}

/// Record a session ending; `outcome` is a short label such as `completed`
pub fn record_session_ended(outcome: &str, duration: Duration) {
    counter!("harness_sessions_ended_total", "outcome" => outcome.to_string()).increment(1);
    gauge!("harness_active_sessions").decrement(1.0);
    histogram!("harness_session_duration_seconds").record(duration.as_secs_f64());
}
