//! Broadcast dispatcher: HTTP trigger → SSE fan-out.
//!
//! Builds one event per publish, serializes it once, and attempts delivery
//! to every live connection. Best-effort, at-most-once: a failed write never
//! aborts the publish, it only lowers the returned count and prunes that
//! connection after the iteration completes.

use crate::protocol::PushEvent;
use crate::registry::ConnectionRegistry;
use metrics::{counter, gauge};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes typed events to registered connections.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Publish an event to all live connections, optionally filtered by role.
    ///
    /// A connection is skipped only when `target_roles` is non-empty and the
    /// connection carries a role outside the list; role-less connections
    /// receive every broadcast. Returns the number of successful writes.
    ///
    /// Side effect: connections whose write fails are deregistered.
    pub fn publish(
        &self,
        event_type: &str,
        data: Option<Value>,
        target_roles: Option<&[String]>,
    ) -> usize {
        let event = PushEvent::new(event_type, data);
        let frame = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize broadcast event: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        let mut dead = Vec::new();

        for connection in self.registry.snapshot() {
            if let (Some(roles), Some(role)) = (target_roles, &connection.role) {
                if !roles.is_empty() && !roles.iter().any(|r| r == role) {
                    continue;
                }
            }

            match connection.send_frame(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!("Dropping connection {}: {}", connection.id, e);
                    dead.push(connection.id.clone());
                }
            }
        }

        // Prune after iterating, never during.
        for id in &dead {
            self.registry.deregister(id);
        }

        counter!("notify_events_published_total").increment(1);
        counter!("notify_frames_sent_total").increment(sent as u64);
        if !dead.is_empty() {
            counter!("notify_connections_pruned_total").increment(dead.len() as u64);
            gauge!("notify_active_connections").set(self.registry.connection_count() as f64);
        }

        debug!(
            "Published '{}' to {}/{} connections",
            event_type,
            sent,
            sent + dead.len()
        );
        sent
    }
}
