//! Frame codec.
//!
//! One event per text frame, encoded exactly as the wire JSON in
//! [`waylay_core::protocol`]. Nothing is added or stripped on the way
//! through, so any peer speaking the same JSON can join.

use waylay_core::protocol::InterceptEvent;

use crate::errors::{BridgeError, Result};

/// Parse one frame.
pub fn decode_frame(text: &str) -> Result<InterceptEvent> {
    serde_json::from_str(text).map_err(BridgeError::Malformed)
}

/// Serialize one event.
pub fn encode_event(event: &InterceptEvent) -> Result<String> {
    serde_json::to_string(event).map_err(BridgeError::Encode)
}
