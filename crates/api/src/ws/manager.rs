use std::collections::{HashMap, HashSet};

use axum::body::Bytes;
use axum::extract::ws::Message;
use stemflow_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    /// When this connection was established.
    pub connected_at: Timestamp,
    /// Groups this connection has joined.
    pub groups: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<String, WsConnection>,
    /// group name -> member connection ids
    groups: HashMap<String, HashSet<String>>,
}

/// Manages all active WebSocket connections and their group memberships.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct WsManager {
    inner: RwLock<Inner>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            sender: tx,
            connected_at: chrono::Utc::now(),
            groups: HashSet::new(),
        };
        self.inner.write().await.connections.insert(conn_id, conn);
        rx
    }

    /// Remove a connection and drop all of its group memberships.
    pub async fn remove(&self, conn_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.connections.remove(conn_id) else {
            return;
        };
        for group in conn.groups {
            leave_group(&mut inner.groups, &group, conn_id);
        }
    }

    /// Add a connection to a group. Returns `false` for unknown connections.
    pub async fn join(&self, conn_id: &str, group: &str) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(conn) = inner.connections.get_mut(conn_id) else {
            return false;
        };
        conn.groups.insert(group.to_string());
        inner
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    /// Remove a connection from a group. Returns whether it was a member.
    pub async fn leave(&self, conn_id: &str, group: &str) -> bool {
        let mut inner = self.inner.write().await;
        let was_member = inner
            .connections
            .get_mut(conn_id)
            .is_some_and(|conn| conn.groups.remove(group));
        if was_member {
            leave_group(&mut inner.groups, group, conn_id);
        }
        was_member
    }

    /// Send a message to every member of a group.
    ///
    /// Returns the number of connections the message was sent to.
    pub async fn send_to_group(&self, group: &str, message: Message) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.groups.get(group) else {
            return 0;
        };
        let mut count = 0;
        for conn_id in members {
            if let Some(conn) = inner.connections.get(conn_id) {
                if conn.sender.send(message.clone()).is_ok() {
                    count += 1;
                }
            }
        }
        count
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Number of connections in a group.
    pub async fn group_size(&self, group: &str) -> usize {
        self.inner
            .read()
            .await
            .groups
            .get(group)
            .map_or(0, HashSet::len)
    }

    /// Send a Close frame to every connection, then clear all state.
    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.write().await;
        let count = inner.connections.len();
        for conn in inner.connections.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        inner.connections.clear();
        inner.groups.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let inner = self.inner.read().await;
        for conn in inner.connections.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn leave_group(groups: &mut HashMap<String, HashSet<String>>, group: &str, conn_id: &str) {
    if let Some(members) = groups.get_mut(group) {
        members.remove(conn_id);
        if members.is_empty() {
            groups.remove(group);
        }
    }
}
