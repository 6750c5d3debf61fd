//! Wire types for the push channel and the HTTP API.
//!
//! Every SSE frame carries one JSON-encoded [`PushEvent`]. Request and
//! response bodies mirror the dashboard's existing JSON contract, so field
//! names stay camelCase where the clients expect them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Push channel
// ============================================================================

/// A single event pushed to connected clients.
///
/// `data` semantics are owned by the event type and opaque to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    /// Event discriminator, e.g. `new_order`, `order_update`, `call_waiter`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary JSON payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Connection id, only present on the initial `connected` event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// ISO-8601 timestamp stamped at publish time.
    pub timestamp: String,
}

impl PushEvent {
    /// Build an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            id: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Initial event sent once per connection, carrying its id.
    pub fn connected(connection_id: &str) -> Self {
        Self {
            event_type: "connected".to_string(),
            data: None,
            id: Some(connection_id.to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Keepalive event sent on a fixed interval.
    pub fn heartbeat() -> Self {
        Self::new("heartbeat", None)
    }
}

// ============================================================================
// HTTP API bodies
// ============================================================================

/// Body of `POST /broadcast`.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    /// Event discriminator; must be non-empty.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload forwarded verbatim to clients.
    #[serde(default)]
    pub data: Option<Value>,
    /// If set and non-empty, only connections carrying one of these roles
    /// (or no role at all) receive the event.
    #[serde(default, rename = "targetRoles")]
    pub target_roles: Option<Vec<String>>,
}

/// Response of `POST /broadcast`.
#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    /// Number of connections the write succeeded on. Attempted writes only:
    /// this is a one-way push with no ack protocol.
    pub sent: usize,
    pub message: String,
}

/// Body of `POST /block`.
#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    #[serde(default)]
    pub ip: Option<String>,
}

/// Body of `PATCH /block`.
#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub minutes: Option<i64>,
}

/// Response of `GET /block?ip=...` and `GET /block/me`.
#[derive(Debug, Serialize)]
pub struct BlockCheckResponse {
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Response of `GET /block` without a query.
#[derive(Debug, Serialize)]
pub struct BlockedListResponse {
    pub success: bool,
    pub blocked: Vec<crate::blocklist::BlockEntry>,
}

/// Generic success/message response for block administration.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}
