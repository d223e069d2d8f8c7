use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::presence::{ConnId, PresenceRegistry};

/// Presence relay and message delivery channel.
///
/// Every connection gets a targeted mpsc channel plus a subscription to the
/// shared broadcast channel. The presence registry decides which targeted
/// channel a user's messages go to.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Events every connection receives (online-user snapshots).
    broadcast_tx: broadcast::Sender<ServerEvent>,

    /// user_id -> conn_id of the connection that currently represents them.
    presence: RwLock<PresenceRegistry>,

    /// conn_id -> targeted sender for that connection.
    connections: RwLock<HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>>>,
}

/// Everything a freshly opened connection needs to pump events to its socket.
pub struct Registration {
    pub conn_id: ConnId,
    pub targeted: mpsc::UnboundedReceiver<ServerEvent>,
    pub broadcasts: broadcast::Receiver<ServerEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: RwLock::new(PresenceRegistry::new()),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Send an event to every open connection.
    pub fn broadcast(&self, event: ServerEvent) {
        // Err only means nobody is subscribed right now.
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Open a connection. With a user id, that user now maps to this
    /// connection (replacing any earlier one). Everyone, including the new
    /// connection, then receives the current online set.
    pub async fn connect(&self, user_id: Option<Uuid>) -> Registration {
        let conn_id = Uuid::new_v4();
        let (tx, targeted) = mpsc::unbounded_channel();
        let broadcasts = self.subscribe();

        self.inner.connections.write().await.insert(conn_id, tx);

        let mut presence = self.inner.presence.write().await;
        if let Some(user_id) = user_id {
            if let Some(previous) = presence.register(user_id, conn_id) {
                debug!("{} reconnected, connection {} superseded", user_id, previous);
            }
        }
        // Broadcast under the lock so snapshots go out in mutation order.
        self.broadcast(ServerEvent::GetOnlineUsers(presence.snapshot()));

        Registration {
            conn_id,
            targeted,
            broadcasts,
        }
    }

    /// Close a connection and re-broadcast the online set. The user's presence
    /// entry is only removed if it still points at this connection.
    pub async fn disconnect(&self, user_id: Option<Uuid>, conn_id: ConnId) {
        self.inner.connections.write().await.remove(&conn_id);

        let mut presence = self.inner.presence.write().await;
        if let Some(user_id) = user_id {
            if !presence.unregister(user_id, conn_id) {
                debug!("{} closed stale connection {}", user_id, conn_id);
            }
        }
        self.broadcast(ServerEvent::GetOnlineUsers(presence.snapshot()));
    }

    /// Push an event to the connection `user_id` is currently mapped to.
    /// Returns false when the user is offline or the connection is gone;
    /// nothing is queued for later.
    pub async fn deliver(&self, user_id: Uuid, event: ServerEvent) -> bool {
        let Some(conn_id) = self.inner.presence.read().await.lookup(user_id) else {
            return false;
        };

        let connections = self.inner.connections.read().await;
        match connections.get(&conn_id) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    warn!("Connection {} for {} closed before delivery", conn_id, user_id);
                    return false;
                }
                true
            }
            None => false,
        }
    }
}
