//! WebSocket front end for the broadcast hub

use crate::config::RelayConfig;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::hub::RelayHandle;
use crate::session::ShutdownListener;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Router accepting WebSocket upgrades on `path`. With `static_dir`, every
/// other path is served from that directory.
pub fn router(relay: RelayHandle, path: &str, static_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .route(path, get(websocket_handler))
        .with_state(relay);
    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };
    app.layer(TraceLayer::new_for_http())
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(relay): State<RelayHandle>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, relay))
}

async fn handle_websocket(socket: WebSocket, relay: RelayHandle) {
    let (id, mut inbox) = match relay.register() {
        Ok(registered) => registered,
        Err(e) => {
            tracing::warn!("Rejecting relay connection: {}", e);
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = inbox.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if relay.broadcast(id, text).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }

    // The hub drops our queue on unregister, which ends the writer
    let _ = relay.unregister(id);
    let _ = writer.await;
}

/// Bind and serve the relay until `shutdown` fires
pub async fn serve(config: &RelayConfig, shutdown: ShutdownListener) -> RelayResult<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .map_err(RelayError::Bind)?;

    let (relay, hub) = RelayHandle::spawn();
    serve_listener(listener, relay, config, shutdown).await?;

    // Upgraded sockets outlive graceful shutdown; don't wait on them forever
    if let Ok(Ok(stats)) = tokio::time::timeout(Duration::from_secs(1), hub).await {
        tracing::info!(
            registered = stats.registered,
            messages = stats.messages,
            deliveries = stats.deliveries,
            "Relay stopped"
        );
    }
    Ok(())
}

/// Serve on an already bound listener, feeding connections into `relay`
pub async fn serve_listener(
    listener: TcpListener,
    relay: RelayHandle,
    config: &RelayConfig,
    mut shutdown: ShutdownListener,
) -> RelayResult<()> {
    let addr = listener.local_addr().map_err(RelayError::Bind)?;
    tracing::info!("Relay listening on ws://{}{}", addr, config.path);
    if let Some(dir) = &config.static_dir {
        tracing::info!("Serving static files from {}", dir.display());
    }

    let app = router(relay.clone(), &config.path, config.static_dir.as_deref());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(RelayError::Serve)?;

    if let Ok(snapshot) = relay.snapshot().await {
        tracing::info!(open = snapshot.open, "Relay no longer accepting connections");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_static_dir_served_beside_websocket_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>chat</h1>").unwrap();

        let config = RelayConfig {
            static_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = crate::session::Shutdown::new();
        let (relay, _hub) = RelayHandle::spawn();
        let server = tokio::spawn({
            let listener_shutdown = shutdown.subscribe();
            async move { serve_listener(listener, relay, &config, listener_shutdown).await }
        });

        let page = http_get(addr, "/").await;
        assert!(page.starts_with("HTTP/1.1 200"), "{page}");
        assert!(page.contains("<h1>chat</h1>"));

        // A plain GET on the socket path is not an upgrade
        let chat = http_get(addr, "/chat").await;
        assert!(!chat.starts_with("HTTP/1.1 200"), "{chat}");

        shutdown.trigger();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_path_without_static_dir_is_not_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = crate::session::Shutdown::new();
        let (relay, _hub) = RelayHandle::spawn();
        let server = tokio::spawn({
            let listener_shutdown = shutdown.subscribe();
            async move {
                serve_listener(listener, relay, &RelayConfig::default(), listener_shutdown).await
            }
        });

        let response = http_get(addr, "/index.html").await;
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");

        shutdown.trigger();
        server.await.unwrap().unwrap();
    }
}
