//! Connection state and registry management.
//!
//! Uses lock-free DashMap so register/deregister/iterate can interleave
//! arbitrarily across connections and the dispatcher. The registry is
//! process-local and empty at startup; clients re-register by reconnecting.

use crate::error::{NotifyError, Result};
use crate::protocol::PushEvent;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Buffer size for per-connection frame channels. A client that falls this
/// far behind has stopped reading and is treated as dead.
pub const CONNECTION_CHANNEL_BUFFER_SIZE: usize = 64;

/// Generate a connection id: unix millis plus a short random suffix.
pub fn next_connection_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// State for a single connected client.
pub struct Connection {
    /// Unique connection identifier.
    pub id: String,
    /// Optional role tag ("owner", "waiter", ...) used for selective
    /// delivery. Absent means the connection receives all broadcasts.
    pub role: Option<String>,
    /// Unix millis when the client connected.
    pub connected_at: i64,
    /// Sending half of the connection's frame channel. The receiving half is
    /// owned exclusively by the client's SSE response stream.
    tx: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(id: String, tx: mpsc::Sender<String>, role: Option<String>) -> Self {
        Self {
            id,
            role,
            connected_at: Utc::now().timestamp_millis(),
            tx,
        }
    }

    /// Serialize and send an event to this client.
    pub fn send(&self, event: &PushEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        self.send_frame(json)
    }

    /// Send a pre-serialized frame to this client. Non-blocking: a closed or
    /// full channel is a write failure, which callers treat as terminal.
    pub fn send_frame(&self, frame: String) -> Result<()> {
        self.tx.try_send(frame).map_err(|_| NotifyError::ChannelSend)
    }
}

/// Lock-free registry of live connections, keyed by connection id.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection. Silently overwrites on id collision, which the
    /// generation scheme makes effectively impossible.
    pub fn register(&self, connection: Arc<Connection>) -> String {
        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        debug!("Connection {} registered", id);
        id
    }

    /// Remove a connection if present; no-op otherwise.
    pub fn deregister(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            debug!("Connection {} deregistered", connection_id);
        }
    }

    /// Get a connection by id.
    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(connection_id).map(|c| c.clone())
    }

    /// Snapshot of the current connections. Mutation during a visit of the
    /// snapshot cannot skip or duplicate other entries.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
