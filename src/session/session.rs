//! Connection session: one accepted stream, one reference payload, one
//! backpressure gate, one sender task and one receiver task.
//!
//! Each task runs under its own `tokio::spawn`, so a panic in either is
//! caught at the join point and turned into a failed session instead of
//! taking the process down. The first task to fail fires a session-scoped
//! cancellation signal and closes the gate; the other task observes either
//! and exits, after which the connection is shut down once. A receiver that
//! reaches its chunk limit first also closes the gate, since nothing would
//! release another token.

use crate::gate::BackpressureGate;
use crate::metrics;
use crate::payload::ReferencePayload;
use crate::session::error::{FailureKind, SessionError, SessionResult};
use crate::session::receiver::{ReceiverTask, INTEGRITY_TARGET};
use crate::session::sender::SenderTask;
use crate::session::shutdown::{Shutdown, ShutdownListener};
use crate::session::types::{
    SessionId, SessionOutcome, SessionReport, SessionSettings, SessionStats, TaskExit,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinError;

/// Upper bound on the best-effort close of the connection at teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Session<S> {
    id: SessionId,
    peer: Option<SocketAddr>,
    stream: S,
    settings: SessionSettings,
    shutdown: Option<ShutdownListener>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, settings: SessionSettings) -> Self {
        Self {
            id: SessionId::new(),
            peer: None,
            stream,
            settings,
            shutdown: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Tear the session down when the process-wide signal fires
    pub fn with_shutdown(mut self, shutdown: ShutdownListener) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Drive the session to completion. Never fails: every fault ends up in
    /// the returned report and in the logs.
    pub async fn run(self) -> SessionReport {
        let started_at = chrono::Utc::now();
        let clock = Instant::now();
        metrics::record_session_started();
        tracing::info!(
            session_id = %self.id,
            peer = ?self.peer,
            chunk_size = self.settings.chunk_size,
            window = self.settings.window,
            verify = ?self.settings.verify,
            "Session started"
        );

        let id = self.id;
        let peer = self.peer;
        let stats = Arc::new(SessionStats::default());

        let (outcome, gate) = match self.prepare() {
            Ok((payload, gate)) => {
                let outcome = self.drive(payload, gate.clone(), stats.clone()).await;
                (outcome, Some(gate))
            }
            Err(e) => {
                // Dropping the stream closes the connection
                tracing::warn!(session_id = %id, "Session setup failed: {}", e);
                (failed(&e), None)
            }
        };

        let report = SessionReport {
            session_id: id,
            peer,
            started_at,
            duration: clock.elapsed(),
            chunks_sent: stats.chunks_sent(),
            chunks_received: stats.chunks_received(),
            bytes_sent: stats.bytes_sent(),
            bytes_received: stats.bytes_received(),
            integrity_failures: stats.integrity_failures(),
            tokens_acquired: gate.as_ref().map_or(0, |g| g.acquired()),
            tokens_released: gate.as_ref().map_or(0, |g| g.released()),
            outcome,
        };

        metrics::record_session_ended(report.outcome.label(), report.duration);
        log_report(&report);
        report
    }

    fn prepare(&self) -> SessionResult<(ReferencePayload, Arc<BackpressureGate>)> {
        let gate = BackpressureGate::new(self.settings.window)?;
        let payload = ReferencePayload::generate(self.settings.chunk_size)?;
        Ok((payload, Arc::new(gate)))
    }

    async fn drive(
        self,
        payload: ReferencePayload,
        gate: Arc<BackpressureGate>,
        stats: Arc<SessionStats>,
    ) -> SessionOutcome {
        let Session {
            id,
            stream,
            settings,
            mut shutdown,
            ..
        } = self;

        let cancel = Shutdown::new();
        let (reader, writer) = tokio::io::split(stream);

        let mut sender = tokio::spawn(
            SenderTask {
                session_id: id,
                writer,
                payload: payload.clone(),
                gate: gate.clone(),
                cancel: cancel.subscribe(),
                stats: stats.clone(),
                chunk_limit: settings.chunk_limit,
            }
            .run(),
        );

        let mut receiver = tokio::spawn(
            ReceiverTask {
                session_id: id,
                reader,
                payload,
                gate: gate.clone(),
                cancel: cancel.subscribe(),
                stats,
                chunk_limit: settings.chunk_limit,
                verify: settings.verify,
                on_mismatch: settings.on_mismatch,
            }
            .run(),
        );

        let teardown = || {
            if cancel.trigger() {
                gate.close();
                tracing::debug!(session_id = %id, "Session teardown started");
            }
        };

        let mut writer_half: Option<WriteHalf<S>> = None;
        let mut reader_half: Option<ReadHalf<S>> = None;
        let mut sender_exit: Option<Option<TaskExit>> = None;
        let mut receiver_exit: Option<Option<TaskExit>> = None;
        let mut first_error: Option<SessionError> = None;
        let mut shutdown_seen = false;

        while sender_exit.is_none() || receiver_exit.is_none() {
            tokio::select! {
                joined = &mut sender, if sender_exit.is_none() => {
                    let (half, result) = unpack("sender", joined);
                    writer_half = half;
                    let exit = settle(result, &mut first_error);
                    if exit != Some(TaskExit::Completed) {
                        teardown();
                    }
                    sender_exit = Some(exit);
                }
                joined = &mut receiver, if receiver_exit.is_none() => {
                    let (half, result) = unpack("receiver", joined);
                    reader_half = half;
                    let exit = settle(result, &mut first_error);
                    if exit != Some(TaskExit::Completed) {
                        teardown();
                    } else if sender_exit.is_none() {
                        // No further releases: a sender parked on the gate would never wake
                        gate.close();
                    }
                    receiver_exit = Some(exit);
                }
                _ = wait_for(&mut shutdown), if !shutdown_seen => {
                    shutdown_seen = true;
                    tracing::info!(session_id = %id, "Shutdown requested, closing session");
                    teardown();
                }
            }
        }

        teardown();
        if let (Some(reader), Some(writer)) = (reader_half, writer_half) {
            close_stream(id, reader.unsplit(writer)).await;
        }

        match (first_error, sender_exit, receiver_exit) {
            (Some(e), _, _) => failed(&e),
            (None, Some(Some(TaskExit::Completed)), Some(Some(TaskExit::Completed))) => {
                SessionOutcome::Completed
            }
            _ => SessionOutcome::Cancelled,
        }
    }
}

/// Split a joined task into its stream half and result. A panicked task
/// loses its half; dropping the other one is enough to close the connection.
fn unpack<H>(
    task: &'static str,
    joined: Result<(H, SessionResult<TaskExit>), JoinError>,
) -> (Option<H>, SessionResult<TaskExit>) {
    match joined {
        Ok((half, result)) => (Some(half), result),
        Err(e) => {
            let reason = if e.is_panic() {
                "panicked".to_string()
            } else {
                e.to_string()
            };
            tracing::error!("{} task aborted: {}", task, reason);
            (None, Err(SessionError::TaskPanicked { task, reason }))
        }
    }
}

/// Record the first error seen; later ones are consequences of the teardown
fn settle(
    result: SessionResult<TaskExit>,
    first_error: &mut Option<SessionError>,
) -> Option<TaskExit> {
    match result {
        Ok(exit) => Some(exit),
        Err(e) => {
            first_error.get_or_insert(e);
            None
        }
    }
}

async fn wait_for(shutdown: &mut Option<ShutdownListener>) {
    match shutdown {
        Some(listener) => listener.wait().await,
        None => std::future::pending().await,
    }
}

/// Best-effort close. Errors here (peer already gone, connection reset) are
/// expected and never escalate.
async fn close_stream<S: AsyncWrite + Unpin>(id: SessionId, mut stream: S) {
    match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(session_id = %id, "Close after teardown: {}", e),
        Err(_) => tracing::debug!(session_id = %id, "Close timed out"),
    }
}

fn failed(error: &SessionError) -> SessionOutcome {
    SessionOutcome::Failed {
        kind: error.kind(),
        reason: error.to_string(),
    }
}

fn log_report(report: &SessionReport) {
    match &report.outcome {
        SessionOutcome::Completed | SessionOutcome::Cancelled => tracing::info!(
            session_id = %report.session_id,
            peer = ?report.peer,
            chunks_sent = report.chunks_sent,
            chunks_received = report.chunks_received,
            integrity_failures = report.integrity_failures,
            throughput_bps = report.throughput_bps() as u64,
            "Session {}",
            report.outcome.label()
        ),
        SessionOutcome::Failed {
            kind: FailureKind::Integrity,
            reason,
        } => tracing::error!(
            target: INTEGRITY_TARGET,
            session_id = %report.session_id,
            peer = ?report.peer,
            integrity_failures = report.integrity_failures,
            "Session terminated on integrity failure: {}",
            reason
        ),
        SessionOutcome::Failed { kind, reason } => tracing::warn!(
            session_id = %report.session_id,
            peer = ?report.peer,
            kind = %kind,
            chunks_sent = report.chunks_sent,
            chunks_received = report.chunks_received,
            "Session failed: {}",
            reason
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MismatchPolicy, VerifyMode};
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn settings(chunk_size: usize, window: usize, chunk_limit: Option<u64>) -> SessionSettings {
        SessionSettings {
            chunk_size,
            window,
            verify: VerifyMode::On,
            on_mismatch: MismatchPolicy::Continue,
            chunk_limit,
        }
    }

    /// Peer that reads each chunk and writes it back, optionally flipping a byte.
    /// Returns its end of the pipe so it stays open until the session closes it.
    async fn echo_peer(
        mut io: DuplexStream,
        chunk_size: usize,
        chunks: u64,
        corrupt: bool,
    ) -> DuplexStream {
        let mut buf = vec![0u8; chunk_size];
        for _ in 0..chunks {
            if io.read_exact(&mut buf).await.is_err() {
                break;
            }
            if corrupt {
                buf[0] ^= 0xFF;
            }
            if io.write_all(&buf).await.is_err() {
                break;
            }
        }
        io
    }

    /// Read everything the session sends until the line goes quiet
    async fn drain_until_quiet(io: &mut DuplexStream, quiet: Duration) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match tokio::time::timeout(quiet, io.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
            }
        }
        received
    }

    async fn run_with_timeout(session: Session<DuplexStream>) -> SessionReport {
        tokio::time::timeout(Duration::from_secs(10), session.run())
            .await
            .expect("session did not finish")
    }

    #[tokio::test]
    async fn test_sender_blocks_after_window_is_full() {
        let chunk_size = 1024;
        let (server_io, mut peer) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(Session::new(server_io, settings(chunk_size, 2, None)).run());

        // Nothing is echoed yet, so exactly W chunks may be outstanding
        let first = drain_until_quiet(&mut peer, Duration::from_millis(200)).await;
        assert_eq!(first.len(), 2 * chunk_size);
        assert_eq!(&first[..chunk_size], &first[chunk_size..]);

        // Acknowledging one chunk frees exactly one token
        peer.write_all(&first[..chunk_size]).await.unwrap();
        let second = drain_until_quiet(&mut peer, Duration::from_millis(200)).await;
        assert_eq!(second.len(), chunk_size);
        assert_eq!(&second[..], &first[..chunk_size]);

        drop(peer);
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.chunks_sent, 3);
        assert_eq!(report.chunks_received, 1);
        assert_eq!(report.tokens_acquired, 3);
        assert_eq!(report.tokens_released, 1);
        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed { kind: FailureKind::Transport, .. }
        ));
    }

    #[tokio::test]
    async fn test_default_sizes_cap_in_flight_at_two_mib() {
        let chunk_size = 1024 * 1024;
        let (server_io, mut peer) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(Session::new(server_io, settings(chunk_size, 2, None)).run());

        let in_flight = drain_until_quiet(&mut peer, Duration::from_millis(300)).await;
        assert_eq!(in_flight.len(), 2 * chunk_size);

        drop(peer);
        let report = handle.await.unwrap();
        assert_eq!(report.chunks_sent, 2);
        assert_eq!(report.chunks_received, 0);
    }

    #[tokio::test]
    async fn test_echo_round_trip_completes() {
        let (server_io, peer) = tokio::io::duplex(4096);
        let peer = tokio::spawn(echo_peer(peer, 64, 100, false));

        let report = run_with_timeout(Session::new(server_io, settings(64, 1, Some(100)))).await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.chunks_sent, 100);
        assert_eq!(report.chunks_received, 100);
        assert_eq!(report.integrity_failures, 0);
        assert_eq!(report.tokens_acquired, 100);
        assert_eq!(report.tokens_released, 100);
        assert_eq!(report.bytes_received, 6400);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_receiver_finishing_first_ends_session() {
        let chunk_size = 64;
        let (server_io, mut peer) = tokio::io::duplex(4096);
        let session = Session::new(server_io, settings(chunk_size, 2, Some(10)));
        let handle = tokio::spawn(session.run());

        // Every chunk the receiver wants arrives before the peer reads anything
        let payload = vec![0xA5u8; chunk_size * 10];
        peer.write_all(&payload).await.unwrap();

        // The peer stays connected: the session must end on its own
        let report = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("session still running after receiver finished")
            .unwrap();

        assert_eq!(report.chunks_received, 10);
        assert!(report.chunks_sent <= 10);
        assert_eq!(report.tokens_acquired, report.chunks_sent);
        assert!(report.tokens_released <= report.tokens_acquired);
        assert_eq!(report.integrity_failures, 10);
        if report.chunks_sent < 10 {
            assert_eq!(report.outcome, SessionOutcome::Cancelled);
        }
        drop(peer);
    }

    #[tokio::test]
    async fn test_receiver_finishing_first_survives_peer_close() {
        let (server_io, mut peer) = tokio::io::duplex(4096);
        let handle = tokio::spawn(Session::new(server_io, settings(64, 2, Some(10))).run());

        peer.write_all(&[0u8; 640]).await.unwrap();
        let sent = drain_until_quiet(&mut peer, Duration::from_millis(100)).await;
        assert!(sent.len() <= 640);
        drop(peer);

        let report = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("session still running after peer closed")
            .unwrap();
        assert_eq!(report.chunks_received, 10);
    }

    #[tokio::test]
    async fn test_corruption_logged_and_session_continues() {
        let (server_io, peer) = tokio::io::duplex(4096);
        let _peer = tokio::spawn(echo_peer(peer, 32, 10, true));

        let report = run_with_timeout(Session::new(server_io, settings(32, 2, Some(10)))).await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.chunks_received, 10);
        assert_eq!(report.integrity_failures, 10);
    }

    #[tokio::test]
    async fn test_corruption_terminates_when_configured() {
        let (server_io, peer) = tokio::io::duplex(4096);
        let _peer = tokio::spawn(echo_peer(peer, 32, 10, true));

        let mut config = settings(32, 2, Some(10));
        config.on_mismatch = MismatchPolicy::Terminate;
        let report = run_with_timeout(Session::new(server_io, config)).await;

        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed { kind: FailureKind::Integrity, .. }
        ));
        assert_eq!(report.integrity_failures, 1);
        assert_eq!(report.chunks_received, 0);
    }

    #[tokio::test]
    async fn test_verify_off_only_counts_bytes() {
        let (server_io, peer) = tokio::io::duplex(4096);
        let _peer = tokio::spawn(echo_peer(peer, 32, 10, true));

        let mut config = settings(32, 2, Some(10));
        config.verify = VerifyMode::Off;
        let report = run_with_timeout(Session::new(server_io, config)).await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.chunks_received, 10);
        assert_eq!(report.integrity_failures, 0);
    }

    #[tokio::test]
    async fn test_short_read_is_transport_failure() {
        let (server_io, mut peer) = tokio::io::duplex(4096);

        let handle = tokio::spawn(Session::new(server_io, settings(64, 1, None)).run());
        let mut chunk = vec![0u8; 64];
        peer.read_exact(&mut chunk).await.unwrap();
        // Half a chunk, then hang up
        peer.write_all(&chunk[..32]).await.unwrap();
        drop(peer);

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed { kind: FailureKind::Transport, .. }
        ));
        assert_eq!(report.chunks_received, 0);
    }

    #[tokio::test]
    async fn test_failing_session_does_not_disturb_sibling() {
        let (doomed_io, mut doomed_peer) = tokio::io::duplex(4096);
        let (healthy_io, healthy_peer) = tokio::io::duplex(4096);

        let doomed = tokio::spawn(Session::new(doomed_io, settings(64, 2, None)).run());
        let healthy = tokio::spawn(Session::new(healthy_io, settings(64, 2, Some(200))).run());
        let _echo = tokio::spawn(echo_peer(healthy_peer, 64, 200, false));

        let mut partial = vec![0u8; 40];
        doomed_peer.read_exact(&mut partial).await.unwrap();
        drop(doomed_peer);

        let doomed = doomed.await.unwrap();
        assert!(doomed.outcome.is_failure());

        let healthy = tokio::time::timeout(Duration::from_secs(10), healthy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(healthy.outcome, SessionOutcome::Completed);
        assert_eq!(healthy.chunks_received, 200);
        assert_eq!(healthy.integrity_failures, 0);
    }

    #[tokio::test]
    async fn test_process_shutdown_cancels_session() {
        let (server_io, peer) = tokio::io::duplex(4096);
        let shutdown = Shutdown::new();

        let session =
            Session::new(server_io, settings(64, 2, None)).with_shutdown(shutdown.subscribe());
        let handle = tokio::spawn(session.run());
        // Peer never echoes: the session sits with a full window
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.trigger();
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert_eq!(report.chunks_sent, 2);
        drop(peer);
    }

    #[tokio::test]
    async fn test_invalid_parameters_fail_setup() {
        let (server_io, _peer) = tokio::io::duplex(64);
        let report = run_with_timeout(Session::new(server_io, settings(0, 2, None))).await;
        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed { kind: FailureKind::Fault, .. }
        ));
        assert_eq!(report.tokens_acquired, 0);

        let (server_io, _peer) = tokio::io::duplex(64);
        let report = run_with_timeout(Session::new(server_io, settings(64, 0, None))).await;
        assert!(report.outcome.is_failure());
    }
}
