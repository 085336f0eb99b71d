use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One accepted WebSocket link.
pub struct Connection {
    pub id: ConnectionId,
    cancel: CancellationToken,
    last_pong: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, cancel: CancellationToken) -> Self {
        Self {
            id,
            cancel,
            last_pong: AtomicU64::new(now_millis()),
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_millis(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        u128::from(now_millis().saturating_sub(last)) < timeout.as_millis()
    }
}

fn now_millis() -> u64 {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
}

/// Everything a connection task needs after registering.
pub struct Registration {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
    pub cancel: CancellationToken,
}

/// Registry of live connections. Connections share nothing through it except
/// their own entry.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and hand back its outbound queue.
    pub fn register(&self) -> Registration {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let cancel = CancellationToken::new();
        let conn = Arc::new(Connection::new(id.clone(), cancel.clone()));
        self.connections.insert(id.clone(), conn);
        Registration { id, tx, rx, cancel }
    }

    /// Remove a connection and signal its task to stop.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            conn.cancel.cancel();
        }
    }

    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.record_pong();
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection (server shutdown).
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.unregister(&id);
        }
    }

    /// Remove connections that haven't answered a ping within `timeout`.
    pub fn sweep_dead(&self, timeout: Duration) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(connection_id = %id, "dropped unresponsive connection");
        }
        dead.len()
    }
}

/// Start a background task that periodically drops unresponsive connections.
pub fn start_sweep_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.sweep_dead(timeout);
                    if removed > 0 {
                        tracing::info!(removed, "dead connection sweep");
                    }
                }
            }
        }
    })
}
