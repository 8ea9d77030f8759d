//! Bridge error types.

use thiserror::Error;

/// Errors at the bridge boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A frame is not a valid event (bad JSON, unknown `direction` or
    /// `trigger`, missing fields).
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// An event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    /// Binding or accepting on the listen socket failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket handshake with a hub failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying WebSocket error.
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
