//! Push transport: the long-lived SSE endpoint.
//!
//! Per connection: register in the registry, emit a `connected` event,
//! heartbeat every 30 seconds, and deregister the moment the client
//! disconnects. The response stream owns the receiving half of the
//! connection's channel; dropping it (the runtime's disconnect signal) runs
//! the cleanup guard immediately rather than waiting for a failed heartbeat.

use crate::protocol::PushEvent;
use crate::registry::{
    next_connection_id, Connection, ConnectionRegistry, CONNECTION_CHANNEL_BUFFER_SIZE,
};
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use metrics::{counter, gauge};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Keepalive interval for open connections.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Query parameters for the streaming endpoint.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Optional role tag for selective delivery ("owner", "waiter", ...).
    pub role: Option<String>,
}

/// GET /events — Server-Sent Events endpoint for real-time updates.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
    let role = query.role.filter(|r| !r.is_empty());
    let connection = Arc::new(Connection::new(next_connection_id(), tx, role));
    let id = state.registry.register(connection.clone());

    counter!("notify_connections_total").increment(1);
    gauge!("notify_active_connections").set(state.registry.connection_count() as f64);
    info!("Connection {} opened", id);

    // The channel is empty at this point, so this cannot fail.
    let _ = connection.send(&PushEvent::connected(&id));

    let heartbeat = tokio::spawn(heartbeat_loop(connection));

    let guard = ConnectionGuard {
        registry: state.registry.clone(),
        id,
        heartbeat,
    };
    let stream = ReceiverStream::new(rx).map(move |frame| {
        let _ = &guard;
        Ok::<_, Infallible>(Event::default().data(frame))
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
}

/// Send a heartbeat on a fixed interval until a send fails. Final cleanup is
/// owned by the connection guard, not this task.
async fn heartbeat_loop(connection: Arc<Connection>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so the initial heartbeat
    // lands one interval after connect.
    interval.tick().await;

    loop {
        interval.tick().await;
        if connection.send(&PushEvent::heartbeat()).is_err() {
            debug!(
                "Heartbeat to {} failed, stopping keepalive",
                connection.id
            );
            break;
        }
    }
}

/// Dropped together with the response stream when the client disconnects.
struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: String,
    heartbeat: JoinHandle<()>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.registry.deregister(&self.id);
        counter!("notify_disconnections_total").increment(1);
        gauge!("notify_active_connections").set(self.registry.connection_count() as f64);
        info!("Connection {} closed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::BlockStore;
    use crate::dispatch::Dispatcher;

    fn test_state() -> Arc<AppState> {
        let registry = Arc::new(ConnectionRegistry::new());
        Arc::new(AppState {
            registry: registry.clone(),
            dispatcher: Arc::new(Dispatcher::new(registry)),
            blocklist: Arc::new(BlockStore::new(
                std::env::temp_dir().join("notify-sse-test-blocked.json"),
            )),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_frames_then_stop_on_dead_channel() {
        let (tx, mut rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
        let connection = Arc::new(Connection::new(next_connection_id(), tx, None));
        let handle = tokio::spawn(heartbeat_loop(connection));

        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "heartbeat");

        // Once the receiver is gone the loop notices on its next tick.
        drop(rx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_registers_and_drop_deregisters() {
        let state = test_state();
        let response = events_handler(
            State(state.clone()),
            Query(EventsQuery {
                role: Some("owner".to_string()),
            }),
        )
        .await
        .into_response();

        assert_eq!(state.registry.connection_count(), 1);
        let connection = state.registry.snapshot().pop().unwrap();
        assert_eq!(connection.role.as_deref(), Some("owner"));

        // Dropping the response body is the disconnect signal; cleanup is
        // immediate, not deferred to the next heartbeat.
        drop(response);
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_role_is_unset() {
        let state = test_state();
        let _response = events_handler(
            State(state.clone()),
            Query(EventsQuery {
                role: Some(String::new()),
            }),
        )
        .await
        .into_response();

        let connection = state.registry.snapshot().pop().unwrap();
        assert!(connection.role.is_none());
    }
}
