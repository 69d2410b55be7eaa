//! Receiver task: read exactly one chunk, optionally verify it, return a
//! window token, repeat.

use crate::config::{MismatchPolicy, VerifyMode};
use crate::gate::BackpressureGate;
use crate::metrics;
use crate::payload::ReferencePayload;
use crate::session::error::{SessionError, SessionResult};
use crate::session::shutdown::ShutdownListener;
use crate::session::types::{SessionId, SessionStats, TaskExit};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Log target for content mismatches, separate from transport failures
pub const INTEGRITY_TARGET: &str = "duplex_harness::integrity";

pub(crate) struct ReceiverTask<R> {
    pub session_id: SessionId,
    pub reader: R,
    pub payload: ReferencePayload,
    pub gate: Arc<BackpressureGate>,
    pub cancel: ShutdownListener,
    pub stats: Arc<SessionStats>,
    pub chunk_limit: Option<u64>,
    pub verify: VerifyMode,
    pub on_mismatch: MismatchPolicy,
}

impl<R: AsyncRead + Unpin> ReceiverTask<R> {
    pub async fn run(mut self) -> (R, SessionResult<TaskExit>) {
        let result = self.pump().await;
        match &result {
            Ok(exit) => tracing::debug!(
                session_id = %self.session_id,
                chunks = self.stats.chunks_received(),
                "Receiver stopped: {:?}",
                exit
            ),
            Err(SessionError::IntegrityMismatch { .. }) => {}
            Err(e) => tracing::warn!(session_id = %self.session_id, "Receiver failed: {}", e),
        }
        (self.reader, result)
    }

    async fn pump(&mut self) -> SessionResult<TaskExit> {
        let chunk_size = self.payload.len();
        let mut buf = vec![0u8; chunk_size];
        let mut received: u64 = 0;

        loop {
            if self.chunk_limit.is_some_and(|limit| received >= limit) {
                return Ok(TaskExit::Completed);
            }

            tokio::select! {
                biased;
                _ = self.cancel.wait() => return Ok(TaskExit::Cancelled),
                read = self.reader.read_exact(&mut buf) => {
                    read.map_err(|source| match source.kind() {
                        ErrorKind::UnexpectedEof => SessionError::ShortRead {
                            chunk: received,
                            expected: chunk_size,
                        },
                        _ => SessionError::Read { chunk: received, source },
                    })?;
                }
            }

            if self.verify == VerifyMode::On && !self.payload.matches(&buf) {
                self.stats.record_integrity_failure();
                metrics::record_integrity_failure();
                tracing::error!(
                    target: INTEGRITY_TARGET,
                    session_id = %self.session_id,
                    chunk = received,
                    expected = %self.payload.digest(),
                    actual = %blake3::hash(&buf),
                    "Chunk content mismatch"
                );

                if self.on_mismatch == MismatchPolicy::Terminate {
                    return Err(SessionError::IntegrityMismatch { chunk: received });
                }
            }

            self.gate.release();
            received += 1;
            self.stats.record_received(chunk_size);
            metrics::record_chunk_received(chunk_size);
            tracing::trace!(session_id = %self.session_id, chunk = received, "Chunk consumed");
        }
    }
}
