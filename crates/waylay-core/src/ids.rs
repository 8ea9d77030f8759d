//! Branded ID newtypes for type safety.
//!
//! Every participant in the interception protocol has a distinct ID type
//! implemented as a newtype wrapper around `String`. This prevents passing an
//! invocation ID where an interceptor ID is expected, which would silently
//! break request/response correlation.
//!
//! Generated IDs are random UUID v4. They only need to be unique, not
//! unguessable.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v4() -> String {
    Uuid::new_v4().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v4())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First dash-separated segment, used in compact log prefixes.
            #[must_use]
            pub fn short(&self) -> &str {
                self.0.split('-').next().unwrap_or(&self.0)
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifies one wrapping (call site). Stable across all invocations
    /// made through the same interceptor.
    InterceptorId
}

branded_id! {
    /// Identifies a single call through an interceptor. Used for
    /// request/response correlation.
    InvocationId
}

branded_id! {
    /// Identifies an event bus instance. Appears in `sourceUuid` chains.
    BusId
}

branded_id! {
    /// Identifies a hook rule inside a router.
    RuleId
}

/// Compact `[interceptor.invocation]` tag for log lines.
#[must_use]
pub fn call_tag(interceptor: &InterceptorId, invocation: &InvocationId) -> String {
    format!("{}.{}", interceptor.short(), invocation.short())
}
