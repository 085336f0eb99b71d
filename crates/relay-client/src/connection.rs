use std::fmt;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_core::ServerFrame;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the client's link to the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Events published by the connection task, in the order they happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Frame(ServerFrame),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection is not open")]
    NotOpen,
    #[error("connection task has stopped")]
    Stopped,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub url: String,
    /// Fixed wait between losing a connection and the next attempt.
    pub reconnect_delay: Duration,
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".to_string(),
            reconnect_delay: Duration::from_millis(6000),
            event_buffer: 256,
        }
    }
}

/// Owns the WebSocket link and reconnects it forever with a constant delay.
///
/// The socket lives in a background task. State is observable through a
/// watch channel; inbound frames and state changes arrive in order on the
/// event receiver returned by [`spawn`](Self::spawn).
pub struct ConnectionManager {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let link = Link {
            state: state_tx,
            events: events_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run(config, link, outbound_rx));

        let manager = Self {
            state: state_rx,
            outbound: outbound_tx,
            cancel,
            task: Some(task),
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Queue one text frame. Refused unless the link is open.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        if self.state() != ConnectionState::Open {
            return Err(SendError::NotOpen);
        }
        self.outbound
            .send(text.to_owned())
            .await
            .map_err(|_| SendError::Stopped)
    }

    /// Close the socket and stop reconnecting.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The task-side half: publishes state and frames.
struct Link {
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl Link {
    async fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
        tracing::debug!(%state, "connection state changed");
        self.emit(ConnectionEvent::StateChanged(state)).await;
    }

    async fn emit(&self, event: ConnectionEvent) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.events.send(event) => {}
        }
    }
}

enum LinkEnd {
    Shutdown,
    Closed,
    Failed(String),
}

async fn run(config: ClientConfig, link: Link, mut outbound: mpsc::Receiver<String>) {
    loop {
        link.set_state(ConnectionState::Connecting).await;

        let attempt = tokio::select! {
            _ = link.cancel.cancelled() => break,
            attempt = connect_async(config.url.as_str()) => attempt,
        };

        match attempt {
            Ok((socket, _)) => {
                // Anything queued while the previous link was dying belongs
                // to no one.
                while outbound.try_recv().is_ok() {}
                tracing::info!(url = %config.url, "connected to relay");
                link.set_state(ConnectionState::Open).await;

                match drive(socket, &link, &mut outbound).await {
                    LinkEnd::Shutdown => break,
                    LinkEnd::Closed => {
                        tracing::info!("relay closed the connection");
                        link.set_state(ConnectionState::Closed).await;
                    }
                    LinkEnd::Failed(error) => {
                        tracing::warn!(%error, "connection lost");
                        link.set_state(ConnectionState::Error).await;
                        link.set_state(ConnectionState::Closed).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "connect failed");
                link.set_state(ConnectionState::Error).await;
                link.set_state(ConnectionState::Closed).await;
            }
        }

        tracing::debug!(delay_ms = config.reconnect_delay.as_millis() as u64, "reconnecting after delay");
        tokio::select! {
            _ = link.cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }

    link.state.send_replace(ConnectionState::Closed);
    tracing::debug!("connection task stopped");
}

async fn drive(socket: Socket, link: &Link, outbound: &mut mpsc::Receiver<String>) -> LinkEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return LinkEnd::Shutdown;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(WsMessage::text(text)).await {
                    return LinkEnd::Failed(e.to_string());
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    link.emit(ConnectionEvent::Frame(ServerFrame::parse(text.as_str()))).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => return LinkEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkEnd::Failed(e.to_string()),
            },
        }
    }
}
