//! Capture/dispatch wire protocol.
//!
//! Events are the only thing that crosses bus and process boundaries. The
//! JSON shape is fixed: camelCase field names, a `direction` tag that selects
//! between [`CaptureEvent`] and [`DispatchEvent`], and a `trigger` tag that
//! selects which half of an invocation the payload belongs to.
//!
//! ```json
//! {
//!   "direction": "capture",
//!   "interceptorUuid": "…",
//!   "invocationUuid": "…",
//!   "sourceUuid": ["…"],
//!   "trigger": "call",
//!   "args": [1, 2, 3]
//! }
//! ```
//!
//! Capture triggers are `call`, `return` or `bypass`; dispatch triggers are
//! only `call` or `return`. An interceptor wrapping with [`Trigger::Bypass`]
//! never runs its function and announces the placeholder result as a
//! `"trigger": "bypass"` capture, not a `return` one, so a peer that picks
//! out return-value captures by tag must accept both. Either is resolved by
//! a `return` dispatch.
//!
//! Payload values are opaque [`serde_json::Value`]s. Anything sent through a
//! remote bridge must be representable as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{BusId, InterceptorId, InvocationId};

/// Which half(s) of an invocation are subject to interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Only the call arguments.
    Call,
    /// Only the return value.
    Return,
    /// Arguments first, then the return value.
    Both,
    /// The wrapped function is never invoked; only a placeholder return value
    /// is offered for resolution.
    Bypass,
}

impl Trigger {
    /// Whether the call arguments are captured.
    #[must_use]
    pub fn intercepts_call(self) -> bool {
        matches!(self, Self::Call | Self::Both)
    }

    /// Whether the return value is captured.
    #[must_use]
    pub fn intercepts_return(self) -> bool {
        matches!(self, Self::Return | Self::Both | Self::Bypass)
    }

    /// Whether the wrapped function actually runs.
    #[must_use]
    pub fn invokes_target(self) -> bool {
        self != Self::Bypass
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Return => write!(f, "return"),
            Self::Both => write!(f, "both"),
            Self::Bypass => write!(f, "bypass"),
        }
    }
}

/// Event direction on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// An invocation reached an interception point.
    Capture,
    /// A captured invocation is being resolved.
    Dispatch,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capture => write!(f, "capture"),
            Self::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// A pre-approved alternative value offered alongside a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOption {
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// The suggested value (an argument array for call captures).
    pub value: Value,
}

impl DispatchOption {
    /// Unlabelled suggestion.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self { label: None, value }
    }

    /// Labelled suggestion.
    #[must_use]
    pub fn labelled(label: impl Into<String>, value: Value) -> Self {
        Self {
            label: Some(label.into()),
            value,
        }
    }
}

/// Trigger-specific body of a [`CaptureEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "lowercase")]
pub enum CapturePayload {
    /// Call arguments awaiting resolution.
    #[serde(rename_all = "camelCase")]
    Call {
        /// The original arguments.
        args: Vec<Value>,
        /// Suggested replacement argument arrays.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dispatch_options_arguments: Option<Vec<DispatchOption>>,
    },
    /// A computed return value awaiting resolution.
    #[serde(rename_all = "camelCase")]
    Return {
        /// The arguments the function was called with.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Value>>,
        /// The proposed return value.
        #[serde(default)]
        rv: Value,
        /// Suggested replacement return values.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dispatch_options_return_value: Option<Vec<DispatchOption>>,
    },
    /// A placeholder return value for a function that was never invoked.
    #[serde(rename_all = "camelCase")]
    Bypass {
        /// The arguments the function would have been called with.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Value>>,
        /// The placeholder return value.
        #[serde(default)]
        rv: Value,
        /// Suggested return values.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dispatch_options_return_value: Option<Vec<DispatchOption>>,
    },
}

/// Announces that an invocation is suspended at an interception point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    /// The wrapping this invocation went through.
    pub interceptor_uuid: InterceptorId,
    /// This invocation.
    pub invocation_uuid: InvocationId,
    /// Buses this event has already passed through, most recent first.
    #[serde(default)]
    pub source_uuid: Vec<BusId>,
    /// Trigger-tagged payload.
    #[serde(flatten)]
    pub payload: CapturePayload,
    /// When `Some(false)`, a resolution must use the original value or one of
    /// the suggestions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_option_override: Option<bool>,
    /// Wall-clock deadline (epoch milliseconds) after which the interceptor
    /// stops waiting. Informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<i64>,
}

impl CaptureEvent {
    /// Trigger tag of this capture (`Call`, `Return` or `Bypass`).
    #[must_use]
    pub fn trigger(&self) -> Trigger {
        match self.payload {
            CapturePayload::Call { .. } => Trigger::Call,
            CapturePayload::Return { .. } => Trigger::Return,
            CapturePayload::Bypass { .. } => Trigger::Bypass,
        }
    }

    /// Arguments carried by the capture, if any.
    #[must_use]
    pub fn args(&self) -> Option<&[Value]> {
        match &self.payload {
            CapturePayload::Call { args, .. } => Some(args),
            CapturePayload::Return { args, .. } | CapturePayload::Bypass { args, .. } => {
                args.as_deref()
            }
        }
    }

    /// Proposed return value, for return and bypass captures.
    #[must_use]
    pub fn rv(&self) -> Option<&Value> {
        match &self.payload {
            CapturePayload::Call { .. } => None,
            CapturePayload::Return { rv, .. } | CapturePayload::Bypass { rv, .. } => Some(rv),
        }
    }

    /// The value a resolution would replace: the argument array for call
    /// captures, the return value otherwise.
    #[must_use]
    pub fn original_value(&self) -> Value {
        match &self.payload {
            CapturePayload::Call { args, .. } => Value::Array(args.clone()),
            CapturePayload::Return { rv, .. } | CapturePayload::Bypass { rv, .. } => rv.clone(),
        }
    }

    /// Suggestions relevant to this capture's trigger.
    #[must_use]
    pub fn suggestions(&self) -> &[DispatchOption] {
        match &self.payload {
            CapturePayload::Call {
                dispatch_options_arguments,
                ..
            } => dispatch_options_arguments.as_deref().unwrap_or_default(),
            CapturePayload::Return {
                dispatch_options_return_value,
                ..
            }
            | CapturePayload::Bypass {
                dispatch_options_return_value,
                ..
            } => dispatch_options_return_value.as_deref().unwrap_or_default(),
        }
    }

    /// Whether `value` is an acceptable resolution payload.
    ///
    /// Always `true` unless `dispatch_option_override` is `Some(false)`, in
    /// which case `value` must equal the original value or one of the
    /// suggestions. Numbers compare by value, so `1` and `1.0` match.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if self.dispatch_option_override != Some(false) {
            return true;
        }
        same_json(value, &self.original_value())
            || self
                .suggestions()
                .iter()
                .any(|option| same_json(value, &option.value))
    }

    /// Whether `dispatch` resolves this capture: same invocation, and a
    /// dispatch trigger matching the half that was captured.
    #[must_use]
    pub fn is_resolved_by(&self, dispatch: &DispatchEvent) -> bool {
        let expected = match self.payload {
            CapturePayload::Call { .. } => Trigger::Call,
            CapturePayload::Return { .. } | CapturePayload::Bypass { .. } => Trigger::Return,
        };
        self.invocation_uuid == dispatch.invocation_uuid && dispatch.trigger() == expected
    }

    /// Whether the interceptor has already given up waiting at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expire_at.is_some_and(|deadline| deadline <= now_ms)
    }

    /// Mirror this capture into an unchanged resolution.
    ///
    /// The source chain is reset: the resolution is authoritative, not a
    /// relay. Return and bypass captures both resolve with a `return` trigger.
    #[must_use]
    pub fn to_dispatch(&self) -> DispatchEvent {
        let payload = match &self.payload {
            CapturePayload::Call { args, .. } => DispatchPayload::Call { args: args.clone() },
            CapturePayload::Return { args, rv, .. } | CapturePayload::Bypass { args, rv, .. } => {
                DispatchPayload::Return {
                    args: args.clone(),
                    rv: rv.clone(),
                }
            }
        };
        DispatchEvent {
            interceptor_uuid: self.interceptor_uuid.clone(),
            invocation_uuid: self.invocation_uuid.clone(),
            source_uuid: Vec::new(),
            payload,
        }
    }

    /// Build a resolution that replaces the captured value with `value`.
    ///
    /// For call captures `value` must be an argument array; `None` is
    /// returned otherwise.
    #[must_use]
    pub fn resolve_with(&self, value: Value) -> Option<DispatchEvent> {
        let mut dispatch = self.to_dispatch();
        match &mut dispatch.payload {
            DispatchPayload::Call { args } => {
                let Value::Array(edited) = value else {
                    return None;
                };
                *args = edited;
            }
            DispatchPayload::Return { rv, .. } => *rv = value,
        }
        Some(dispatch)
    }
}

/// JSON equality with numbers compared by value rather than representation.
fn same_json(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_json(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| same_json(x, y)))
        }
        _ => a == b,
    }
}

/// Trigger-specific body of a [`DispatchEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "lowercase")]
pub enum DispatchPayload {
    /// Resolved call arguments.
    #[serde(rename_all = "camelCase")]
    Call {
        /// Arguments the wrapped function will be called with.
        args: Vec<Value>,
    },
    /// Resolved return value. A wire `bypass` trigger is read as `return`.
    #[serde(rename_all = "camelCase", alias = "bypass")]
    Return {
        /// Arguments echoed back from the capture.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Value>>,
        /// Final return value.
        #[serde(default)]
        rv: Value,
    },
}

/// Resolves a previously captured invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEvent {
    /// The wrapping the resolved invocation went through.
    pub interceptor_uuid: InterceptorId,
    /// The invocation being resolved.
    pub invocation_uuid: InvocationId,
    /// Buses this event has already passed through, most recent first.
    #[serde(default)]
    pub source_uuid: Vec<BusId>,
    /// Trigger-tagged payload.
    #[serde(flatten)]
    pub payload: DispatchPayload,
}

impl DispatchEvent {
    /// Resolve the call half of an invocation with `args`.
    #[must_use]
    pub fn call(interceptor: InterceptorId, invocation: InvocationId, args: Vec<Value>) -> Self {
        Self {
            interceptor_uuid: interceptor,
            invocation_uuid: invocation,
            source_uuid: Vec::new(),
            payload: DispatchPayload::Call { args },
        }
    }

    /// Resolve the return half of an invocation with `rv`.
    #[must_use]
    pub fn returning(interceptor: InterceptorId, invocation: InvocationId, rv: Value) -> Self {
        Self {
            interceptor_uuid: interceptor,
            invocation_uuid: invocation,
            source_uuid: Vec::new(),
            payload: DispatchPayload::Return { args: None, rv },
        }
    }

    /// Trigger tag of this dispatch (`Call` or `Return`).
    #[must_use]
    pub fn trigger(&self) -> Trigger {
        match self.payload {
            DispatchPayload::Call { .. } => Trigger::Call,
            DispatchPayload::Return { .. } => Trigger::Return,
        }
    }
}

/// Any event carried by a bus or a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum InterceptEvent {
    /// See [`CaptureEvent`].
    Capture(CaptureEvent),
    /// See [`DispatchEvent`].
    Dispatch(DispatchEvent),
}

impl InterceptEvent {
    /// Direction tag.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            Self::Capture(_) => Direction::Capture,
            Self::Dispatch(_) => Direction::Dispatch,
        }
    }

    /// Interceptor ID of the underlying event.
    #[must_use]
    pub fn interceptor_uuid(&self) -> &InterceptorId {
        match self {
            Self::Capture(e) => &e.interceptor_uuid,
            Self::Dispatch(e) => &e.interceptor_uuid,
        }
    }

    /// Invocation ID of the underlying event.
    #[must_use]
    pub fn invocation_uuid(&self) -> &InvocationId {
        match self {
            Self::Capture(e) => &e.invocation_uuid,
            Self::Dispatch(e) => &e.invocation_uuid,
        }
    }

    /// Provenance chain of the underlying event.
    #[must_use]
    pub fn source_uuid(&self) -> &[BusId] {
        match self {
            Self::Capture(e) => &e.source_uuid,
            Self::Dispatch(e) => &e.source_uuid,
        }
    }

    /// Trigger tag of the underlying event.
    #[must_use]
    pub fn trigger(&self) -> Trigger {
        match self {
            Self::Capture(e) => e.trigger(),
            Self::Dispatch(e) => e.trigger(),
        }
    }

    /// Whether `bus` already relayed this event.
    #[must_use]
    pub fn has_passed(&self, bus: &BusId) -> bool {
        self.source_uuid().contains(bus)
    }

    /// Copy of this event with `bus` prepended to its provenance chain.
    #[must_use]
    pub fn relayed_by(&self, bus: &BusId) -> Self {
        let mut next = self.clone();
        let chain = match &mut next {
            Self::Capture(e) => &mut e.source_uuid,
            Self::Dispatch(e) => &mut e.source_uuid,
        };
        chain.insert(0, bus.clone());
        next
    }
}

impl From<CaptureEvent> for InterceptEvent {
    fn from(event: CaptureEvent) -> Self {
        Self::Capture(event)
    }
}

impl From<DispatchEvent> for InterceptEvent {
    fn from(event: DispatchEvent) -> Self {
        Self::Dispatch(event)
    }
}
