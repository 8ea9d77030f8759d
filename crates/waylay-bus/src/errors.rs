//! Interceptor error types.

use thiserror::Error;
use waylay_core::ids::InvocationId;
use waylay_core::protocol::Trigger;

/// Ways an intercepted invocation can fail.
///
/// A timeout is not an error: the original arguments or result are used.
#[derive(Debug, Error)]
pub enum InterceptError {
    /// A dispatch resolved the wrong half of the invocation.
    #[error("protocol violation for invocation {invocation}: expected {expected} dispatch, got {received}")]
    Protocol {
        /// The invocation that received the dispatch.
        invocation: InvocationId,
        /// Which half was waiting.
        expected: Trigger,
        /// Trigger tag of the dispatch that arrived.
        received: Trigger,
    },

    /// Arguments or result could not be encoded as JSON.
    #[error("failed to encode {what}: {source}")]
    Encode {
        /// `"arguments"` or `"return value"`.
        what: &'static str,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// Arguments did not encode to a JSON array.
    #[error("arguments must encode to a JSON array, got {0}")]
    ArgumentsNotArray(String),

    /// A dispatched (or placeholder) payload does not fit the function's types.
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// `"arguments"`, `"return value"` or `"bypass placeholder"`.
        what: &'static str,
        /// Underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The pending dispatch listener went away before resolving.
    #[error("dispatch listener for invocation {0} was dropped")]
    ListenerDropped(InvocationId),
}

/// Result type for intercepted calls.
pub type Result<T> = std::result::Result<T, InterceptError>;
