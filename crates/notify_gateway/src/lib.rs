//! Notification gateway for the ordering platform.
//!
//! This service:
//! - Accepts long-lived SSE connections from dashboard and customer clients
//! - Fans typed events (`new_order`, `order_update`, `call_waiter`, ...) out
//!   to every live connection, optionally filtered by staff role
//! - Enforces a TTL-based IP blocklist in front of every route, redirecting
//!   blocked callers to a notice page
//!
//! ## Architecture
//!
//! ```text
//! POST /broadcast {type, data, targetRoles?}
//!         ↓
//! Dispatcher (serialize once, role filter)
//!         ↓
//! ConnectionRegistry (DashMap-based, lock-free)
//!         ↓
//! SSE clients (GET /events, `data: <JSON>\n\n` frames)
//!
//! every request ──► access_gate middleware ──► BlockStore (blocked.json)
//! ```
//!
//! ## Delivery model
//!
//! Push is best-effort, at-most-once, with no acks, persistence or replay.
//! A dropped client reconnects to resume delivery; a failed write prunes the
//! connection from the registry.

pub mod blocklist;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod ip;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sse;

pub use blocklist::{BlockEntry, BlockObserver, BlockStore, DEFAULT_BLOCK_MINUTES};
pub use dispatch::Dispatcher;
pub use error::{NotifyError, Result};
pub use gate::{access_gate, ClientIp};
pub use protocol::{BroadcastRequest, PushEvent};
pub use registry::{Connection, ConnectionRegistry};
pub use server::{create_router, AppState};
