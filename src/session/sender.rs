//! Sender task: take a window token, write one reference chunk, repeat.

use crate::gate::BackpressureGate;
use crate::metrics;
use crate::payload::ReferencePayload;
use crate::session::error::{SessionError, SessionResult};
use crate::session::shutdown::ShutdownListener;
use crate::session::types::{SessionId, SessionStats, TaskExit};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub(crate) struct SenderTask<W> {
    pub session_id: SessionId,
    pub writer: W,
    pub payload: ReferencePayload,
    pub gate: Arc<BackpressureGate>,
    pub cancel: ShutdownListener,
    pub stats: Arc<SessionStats>,
    pub chunk_limit: Option<u64>,
}

impl<W: AsyncWrite + Unpin> SenderTask<W> {
    /// Run until the chunk limit, cancellation, or a write failure.
    /// The write half is handed back so the session can close the connection.
    pub async fn run(mut self) -> (W, SessionResult<TaskExit>) {
        let result = self.pump().await;
        match &result {
            Ok(exit) => tracing::debug!(
                session_id = %self.session_id,
                chunks = self.stats.chunks_sent(),
                "Sender stopped: {:?}",
                exit
            ),
            Err(e) => tracing::warn!(session_id = %self.session_id, "Sender failed: {}", e),
        }
        (self.writer, result)
    }

    async fn pump(&mut self) -> SessionResult<TaskExit> {
        let mut sent: u64 = 0;

        loop {
            if self.chunk_limit.is_some_and(|limit| sent >= limit) {
                return Ok(TaskExit::Completed);
            }

            let waiting = Instant::now();
            tokio::select! {
                biased;
                _ = self.cancel.wait() => return Ok(TaskExit::Cancelled),
                acquired = self.gate.acquire() => {
                    // Closed on teardown, or once the receiver has finished
                    if acquired.is_err() {
                        return Ok(TaskExit::Cancelled);
                    }
                }
            }
            metrics::record_gate_wait(waiting.elapsed());

            tokio::select! {
                biased;
                _ = self.cancel.wait() => return Ok(TaskExit::Cancelled),
                written = write_chunk(&mut self.writer, &self.payload) => {
                    written.map_err(|source| SessionError::Write { chunk: sent, source })?;
                }
            }

            sent += 1;
            self.stats.record_sent(self.payload.len());
            metrics::record_chunk_sent(self.payload.len());
            tracing::trace!(session_id = %self.session_id, chunk = sent, "Chunk written");
        }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &ReferencePayload,
) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    // TLS streams buffer records until flushed
    writer.flush().await
}
