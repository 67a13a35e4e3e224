use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// One open real-time connection. Events sent here are written to the socket
/// by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this connection. Returns false if the connection
    /// has already gone away.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Tracks which connections are joined to each user's channel.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<Rooms>>,
}

#[derive(Default)]
struct Rooms {
    /// user_id -> (conn_id -> handle)
    members: HashMap<Uuid, HashMap<Uuid, ConnectionHandle>>,

    /// conn_id -> user_id, so a handle sits in exactly one room
    owners: HashMap<Uuid, Uuid>,
}

impl Rooms {
    fn remove(&mut self, user_id: Uuid, conn_id: Uuid) -> bool {
        let Some(room) = self.members.get_mut(&user_id) else {
            return false;
        };
        let removed = room.remove(&conn_id).is_some();
        if room.is_empty() {
            self.members.remove(&user_id);
        }
        removed
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` to `user_id`'s channel. Joining again with the same
    /// handle is a no-op; joining under another user moves the handle.
    pub async fn join(&self, user_id: Uuid, handle: ConnectionHandle) {
        let mut rooms = self.inner.write().await;
        let conn_id = handle.id();

        if let Some(previous) = rooms.owners.insert(conn_id, user_id) {
            if previous != user_id {
                rooms.remove(previous, conn_id);
            }
        }

        rooms
            .members
            .entry(user_id)
            .or_default()
            .insert(conn_id, handle);
    }

    /// Remove `handle` from `user_id`'s channel. Returns true if it was there.
    pub async fn leave(&self, user_id: Uuid, handle: &ConnectionHandle) -> bool {
        let mut rooms = self.inner.write().await;
        let conn_id = handle.id();

        if rooms.owners.get(&conn_id) != Some(&user_id) {
            return false;
        }
        rooms.owners.remove(&conn_id);
        rooms.remove(user_id, conn_id)
    }

    /// Snapshot of the handles joined to `user_id`'s channel. Handles may
    /// disconnect right after this returns.
    pub async fn lookup(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .members
            .get(&user_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of users with at least one joined connection.
    pub async fn online_count(&self) -> usize {
        self.inner.read().await.members.len()
    }
}
