//! Hook error types.

use thiserror::Error;
use waylay_core::ids::InvocationId;

/// Errors from rule management.
#[derive(Debug, Error)]
pub enum HookError {
    /// The mask is not a valid regular expression.
    #[error("invalid uuid mask '{mask}': {source}")]
    InvalidMask {
        /// The rejected pattern.
        mask: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// No rule at the given position.
    #[error("rule index {index} out of range ({len} rules)")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of rules at the time.
        len: usize,
    },
}

/// Reasons a manual submission is refused. The event stays queued.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Nothing is queued under this invocation ID.
    #[error("invocation {0} is not queued")]
    NotQueued(InvocationId),

    /// The edited text is not JSON.
    #[error("edited value is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// A call capture was resolved with something other than an array.
    #[error("arguments for invocation {0} must be a JSON array")]
    InvalidArguments(InvocationId),

    /// Free-form edits are disabled and the value is neither the original
    /// nor one of the suggestions.
    #[error("value for invocation {0} is not one of the suggested options")]
    NotSuggested(InvocationId),

    /// The rule attached to the submission could not be registered.
    #[error("rule attached to submission rejected: {0}")]
    InvalidRule(#[from] HookError),
}

/// Result type for rule management.
pub type Result<T> = std::result::Result<T, HookError>;
