//! TLS acceptor: owns the listening socket and hands every accepted
//! connection to its own session task.

use crate::config::HarnessConfig;
use crate::metrics;
use crate::network::error::{NetworkError, NetworkResult};
use crate::session::{
    Session, SessionRegistry, SessionReport, SessionSettings, ShutdownListener,
};
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

pub struct Acceptor {
    listener: TcpListener,
    tls: TlsAcceptor,
    settings: SessionSettings,
    handshake_timeout: Duration,
    shutdown_grace: Duration,
    shutdown: ShutdownListener,
    registry: Arc<SessionRegistry>,
    reports: Option<mpsc::UnboundedSender<SessionReport>>,
}

/// Everything a spawned connection task needs, cloned per connection
#[derive(Clone)]
struct ConnectionContext {
    tls: TlsAcceptor,
    settings: SessionSettings,
    handshake_timeout: Duration,
    shutdown: ShutdownListener,
    registry: Arc<SessionRegistry>,
    reports: Option<mpsc::UnboundedSender<SessionReport>>,
}

impl Acceptor {
    /// Bind the listener. A bind failure is fatal for the caller.
    pub async fn bind(
        config: &HarnessConfig,
        tls_config: Arc<ServerConfig>,
        shutdown: ShutdownListener,
    ) -> NetworkResult<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: config.listen_addr,
                source,
            })?;

        Ok(Self {
            listener,
            tls: TlsAcceptor::from(tls_config),
            settings: SessionSettings::from(config),
            handshake_timeout: config.handshake_timeout(),
            shutdown_grace: config.shutdown_grace(),
            shutdown,
            registry: Arc::new(SessionRegistry::new()),
            reports: None,
        })
    }

    /// Forward every finished session's report to `sink`
    pub fn with_report_sink(mut self, sink: mpsc::UnboundedSender<SessionReport>) -> Self {
        self.reports = Some(sink);
        self
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        self.listener.local_addr().map_err(NetworkError::IoError)
    }

    /// Sessions currently running under this acceptor
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept until shutdown or an accept error. Accept errors end the loop
    /// and are returned; session failures never are.
    pub async fn run(self) -> NetworkResult<()> {
        let Acceptor {
            listener,
            tls,
            settings,
            handshake_timeout,
            shutdown_grace,
            mut shutdown,
            registry,
            reports,
        } = self;

        let local_addr = listener.local_addr().ok();
        tracing::info!("Harness listening on {:?}", local_addr);

        let context = ConnectionContext {
            tls,
            settings,
            handshake_timeout,
            shutdown: shutdown.clone(),
            registry: registry.clone(),
            reports,
        };
        let mut sessions = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((tcp, peer)) => {
                        tracing::debug!(%peer, "Connection accepted");
                        sessions.spawn(serve_connection(context.clone(), tcp, peer));
                    }
                    Err(e) => {
                        tracing::error!("Accept failed, stopping listener: {}", e);
                        break Err(NetworkError::Accept(e));
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task aborted: {}", e);
                    }
                }
            }
        };

        drop(listener);
        if result.is_err() {
            sessions.abort_all();
        }
        drain(sessions, shutdown_grace, &registry).await;
        result
    }
}

/// Wait for running sessions to observe shutdown, then abort stragglers
async fn drain(mut sessions: JoinSet<()>, grace: Duration, registry: &SessionRegistry) {
    if sessions.is_empty() {
        return;
    }

    tracing::info!("Waiting up to {:?} for {} sessions", grace, sessions.len());
    for (id, session) in registry.list() {
        tracing::info!(
            session_id = %id,
            peer = %session.peer,
            age_ms = (chrono::Utc::now() - session.started_at).num_milliseconds(),
            "Draining session"
        );
    }
    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("Connection task panicked: {}", e);
                }
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!("Aborting {} sessions after grace period", sessions.len());
        let stragglers = registry.list();
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
        // Aborted connection tasks never reach their own deregistration
        for (id, session) in stragglers {
            tracing::warn!(session_id = %id, peer = %session.peer, "Session aborted");
            registry.remove(&id);
        }
    }
}

async fn serve_connection(context: ConnectionContext, tcp: TcpStream, peer: SocketAddr) {
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
    }

    let stream = match tokio::time::timeout(context.handshake_timeout, context.tls.accept(tcp))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(%peer, "TLS handshake failed: {}", e);
            metrics::record_handshake_failed("error");
            return;
        }
        Err(_) => {
            tracing::warn!(%peer, "TLS handshake timed out after {:?}", context.handshake_timeout);
            metrics::record_handshake_failed("timeout");
            return;
        }
    };

    let session = Session::new(stream, context.settings)
        .with_peer(peer)
        .with_shutdown(context.shutdown);
    let id = session.id();

    context.registry.insert(id, peer);
    let report = session.run().await;
    context.registry.remove(&id);

    if let Some(sink) = context.reports {
        let _ = sink.send(report);
    }
}
