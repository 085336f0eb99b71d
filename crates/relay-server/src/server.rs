use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use relay_core::StreamSource;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::registry::{self, ConnectionRegistry};
use crate::session::RelaySession;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// A connection that hasn't answered a ping for this long is dropped.
    pub liveness_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_send_queue: 1024,
            heartbeat_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(90),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub source: Arc<dyn StreamSource>,
    pub heartbeat_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    source: Arc<dyn StreamSource>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let shutdown = CancellationToken::new();

    let sweeper = registry::start_sweep_task(
        Arc::clone(&registry),
        config.heartbeat_interval,
        config.liveness_timeout,
        shutdown.child_token(),
    );

    let source_name = source.name().to_owned();
    let state = AppState {
        registry: Arc::clone(&registry),
        source,
        heartbeat_interval: config.heartbeat_interval,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, source = %source_name, "relay server started");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "relay server stopped with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        shutdown,
        registry,
        server,
        sweeper,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    /// Close every connection and wait for the server to stop.
    pub async fn shutdown(self) {
        tracing::info!(connections = self.registry.count(), "relay server shutting down");
        self.shutdown.cancel();
        self.registry.close_all();
        let _ = self.server.await;
        let _ = self.sweeper.await;
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
    }))
}

/// Drive one WebSocket connection until it closes.
///
/// The writer task owns the sink: it drains the outbound queue in order and
/// sends periodic pings. The reader loop feeds text frames to the
/// connection's [`RelaySession`].
async fn handle_socket(socket: WebSocket, state: AppState) {
    let registration = state.registry.register();
    let id = registration.id.clone();
    let cancel = registration.cancel.clone();
    tracing::info!(connection_id = %id, "client connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_frames(
        ws_tx,
        registration.rx,
        state.heartbeat_interval,
        cancel.clone(),
    ));

    let mut session = RelaySession::new(id.clone(), Arc::clone(&state.source), registration.tx);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    session.on_inbound_request(text.as_str()).await;
                }
                Some(Ok(WsMessage::Pong(_))) => state.registry.record_pong(&id),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %id, error = %e, "socket read failed");
                    break;
                }
            },
        }
    }

    session.on_disconnect();
    cancel.cancel();
    let _ = writer.await;
    state.registry.unregister(&id);
    tracing::info!(connection_id = %id, "client disconnected");
}

async fn write_frames(
    mut ws_tx: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
    heartbeat: Duration,
    cancel: CancellationToken,
) {
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Wakes the reader loop if the sink failed first.
    cancel.cancel();
    let _ = ws_tx.close().await;
}
