//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The per-connection channel is closed or full; the connection is
    /// treated as dead.
    #[error("Channel send error")]
    ChannelSend,
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
