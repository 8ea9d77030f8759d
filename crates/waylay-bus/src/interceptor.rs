//! Function interceptor.
//!
//! [`intercept`] wraps an async function `A -> R` into an [`Interceptor`]
//! whose [`call`](Interceptor::call) behaves like the original, except that
//! each invocation may stop at up to two points and wait for a dispatch:
//!
//! 1. **Call side** (`call`, `both`): the arguments are captured. A matching
//!    `call` dispatch replaces them; on timeout the originals are used.
//! 2. **Return side** (`return`, `both`, `bypass`): the result is captured. A
//!    matching `return` dispatch replaces it; on timeout it stands.
//!
//! `bypass` never runs the wrapped function. Its capture is tagged `bypass`
//! and carries the configured placeholder, which a dispatch is expected to replace.
//!
//! Each wait is armed with its own timer, so a `both` invocation can stay
//! suspended for up to twice the timeout. Without a timeout a wait lasts
//! until a dispatch arrives.
//!
//! Arguments and results cross the bus as JSON: `A` must encode to a JSON
//! array (a tuple or a `Vec`), and both must round-trip through
//! [`serde_json::Value`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};
use waylay_core::ids::{InterceptorId, InvocationId, call_tag};
use waylay_core::protocol::{
    CaptureEvent, CapturePayload, DispatchEvent, DispatchOption, DispatchPayload, Trigger,
};

use crate::bus::{EventBus, Subscription};
use crate::errors::{InterceptError, Result};

/// How an [`Interceptor`] suspends its invocations.
#[derive(Debug, Clone)]
pub struct InterceptOptions {
    /// Which halves of each invocation are captured.
    pub trigger: Trigger,
    /// Interceptor ID. A random one is generated when `None`.
    pub uuid: Option<InterceptorId>,
    /// Upper bound on each wait. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Suggested replacement argument arrays.
    pub dispatch_options_arguments: Option<Vec<DispatchOption>>,
    /// Suggested replacement return values.
    pub dispatch_options_return_value: Option<Vec<DispatchOption>>,
    /// `Some(false)` restricts resolutions to the original value or a
    /// suggestion. Enforced by whoever decides, not by the bus.
    pub dispatch_option_override: Option<bool>,
    /// Return value offered for `bypass` invocations.
    pub bypass_placeholder: Value,
}

impl InterceptOptions {
    /// Options for `trigger` with no timeout and no suggestions.
    #[must_use]
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            uuid: None,
            timeout: None,
            dispatch_options_arguments: None,
            dispatch_options_return_value: None,
            dispatch_option_override: None,
            bypass_placeholder: Value::Null,
        }
    }

    /// Use a fixed interceptor ID.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<InterceptorId>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Bound each wait by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound each wait by `timeout_ms` milliseconds.
    #[must_use]
    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(timeout_ms))
    }

    /// Offer suggested argument arrays.
    #[must_use]
    pub fn with_argument_options(mut self, options: Vec<DispatchOption>) -> Self {
        self.dispatch_options_arguments = Some(options);
        self
    }

    /// Offer suggested return values.
    #[must_use]
    pub fn with_return_options(mut self, options: Vec<DispatchOption>) -> Self {
        self.dispatch_options_return_value = Some(options);
        self
    }

    /// Allow or forbid free-form edits.
    #[must_use]
    pub fn with_override(mut self, allowed: bool) -> Self {
        self.dispatch_option_override = Some(allowed);
        self
    }

    /// Placeholder offered by `bypass` invocations.
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: Value) -> Self {
        self.bypass_placeholder = placeholder;
        self
    }
}

/// Wrap `target` so its invocations are routed through `bus`.
pub fn intercept<F, Fut, A, R>(bus: &EventBus, target: F, options: InterceptOptions) -> Interceptor<F, A, R>
where
    F: Fn(A) -> Fut,
    Fut: Future<Output = R>,
    A: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    let id = options.uuid.clone().unwrap_or_default();
    debug!(interceptor = %id.short(), trigger = %options.trigger, "interceptor created");
    Interceptor {
        bus: bus.clone(),
        target,
        id,
        options,
        _types: PhantomData,
    }
}

/// A wrapped function. See the [module docs](self).
pub struct Interceptor<F, A, R> {
    bus: EventBus,
    target: F,
    id: InterceptorId,
    options: InterceptOptions,
    _types: PhantomData<fn(A) -> R>,
}

impl<F, Fut, A, R> Interceptor<F, A, R>
where
    F: Fn(A) -> Fut,
    Fut: Future<Output = R>,
    A: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    /// Stable ID of this wrapping.
    #[must_use]
    pub fn id(&self) -> &InterceptorId {
        &self.id
    }

    /// Options this interceptor was built with.
    #[must_use]
    pub fn options(&self) -> &InterceptOptions {
        &self.options
    }

    /// Invoke the wrapped function through the protocol.
    pub async fn call(&self, args: A) -> Result<R> {
        let invocation = InvocationId::new();
        let tag = call_tag(&self.id, &invocation);
        let trigger = self.options.trigger;

        let (args, arg_values) = if trigger.intercepts_call() {
            let original = encode_args(&args)?;
            let shown = Value::Array(original.clone());
            info!(call = %tag, args = %shown, "intercepted call");
            let capture = self.capture_event(
                &invocation,
                CapturePayload::Call {
                    args: original,
                    dispatch_options_arguments: self.options.dispatch_options_arguments.clone(),
                },
            );
            match self.suspend(capture).await? {
                Some(dispatch) => match dispatch.payload {
                    DispatchPayload::Call { args: rewritten } => {
                        let decoded = decode(Value::Array(rewritten.clone()), "arguments")?;
                        (decoded, Some(rewritten))
                    }
                    DispatchPayload::Return { .. } => {
                        return Err(InterceptError::Protocol {
                            invocation,
                            expected: Trigger::Call,
                            received: Trigger::Return,
                        });
                    }
                },
                None => {
                    debug!(call = %tag, "call wait timed out, keeping original arguments");
                    let original = encode_args(&args)?;
                    (args, Some(original))
                }
            }
        } else if trigger.intercepts_return() {
            // Informational only on the return capture.
            let encoded = encode_args(&args).ok();
            (args, encoded)
        } else {
            (args, None)
        };

        let computed = if trigger.invokes_target() {
            debug!(call = %tag, "calling target");
            Some((self.target)(args).await)
        } else {
            None
        };

        let computed = match computed {
            Some(result) if !trigger.intercepts_return() => return Ok(result),
            other => other,
        };

        let rv = match &computed {
            Some(result) => serde_json::to_value(result).map_err(|source| InterceptError::Encode {
                what: "return value",
                source,
            })?,
            None => self.options.bypass_placeholder.clone(),
        };
        info!(call = %tag, rv = %rv, "intercepted return value");

        let dispatch_options_return_value = self.options.dispatch_options_return_value.clone();
        let payload = if computed.is_some() {
            CapturePayload::Return {
                args: arg_values,
                rv,
                dispatch_options_return_value,
            }
        } else {
            CapturePayload::Bypass {
                args: arg_values,
                rv,
                dispatch_options_return_value,
            }
        };
        let capture = self.capture_event(&invocation, payload);
        let result = match self.suspend(capture).await? {
            Some(dispatch) => match dispatch.payload {
                DispatchPayload::Return { rv, .. } => decode(rv, "return value")?,
                DispatchPayload::Call { .. } => {
                    return Err(InterceptError::Protocol {
                        invocation,
                        expected: Trigger::Return,
                        received: Trigger::Call,
                    });
                }
            },
            None => {
                debug!(call = %tag, "return wait timed out, keeping computed result");
                match computed {
                    Some(result) => result,
                    None => decode(self.options.bypass_placeholder.clone(), "bypass placeholder")?,
                }
            }
        };
        trace!(call = %tag, "returning");
        Ok(result)
    }

    fn capture_event(&self, invocation: &InvocationId, payload: CapturePayload) -> CaptureEvent {
        CaptureEvent {
            interceptor_uuid: self.id.clone(),
            invocation_uuid: invocation.clone(),
            source_uuid: Vec::new(),
            payload,
            dispatch_option_override: self.options.dispatch_option_override,
            expire_at: self.options.timeout.map(deadline_ms),
        }
    }

    /// Emit `capture` and wait for its dispatch. `None` means timed out.
    async fn suspend(&self, capture: CaptureEvent) -> Result<Option<DispatchEvent>> {
        // Listen before emitting: a pass-through may resolve synchronously
        // inside `capture`.
        let pending = PendingDispatch::register(&self.bus, capture.invocation_uuid.clone());
        self.bus.capture(capture);
        pending.wait(self.options.timeout).await
    }
}

impl<F: Clone, A, R> Clone for Interceptor<F, A, R> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            target: self.target.clone(),
            id: self.id.clone(),
            options: self.options.clone(),
            _types: PhantomData,
        }
    }
}

impl<F, A, R> std::fmt::Debug for Interceptor<F, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("id", &self.id)
            .field("trigger", &self.options.trigger)
            .field("timeout", &self.options.timeout)
            .finish_non_exhaustive()
    }
}

/// One outstanding wait for a dispatch.
///
/// The listener resolves at most once: the first dispatch carrying the
/// invocation ID takes the sender and deregisters the listener. Later
/// dispatches for the same ID find the slot empty and are ignored.
struct PendingDispatch {
    invocation: InvocationId,
    rx: oneshot::Receiver<DispatchEvent>,
    subscription: Subscription,
}

impl PendingDispatch {
    fn register(bus: &EventBus, invocation: InvocationId) -> Self {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let registration: Arc<OnceLock<Subscription>> = Arc::default();

        let own = invocation.clone();
        let own_registration = Arc::clone(&registration);
        let subscription = bus.on_dispatch(move |event| {
            if event.invocation_uuid != own {
                trace!(invocation = %own.short(), other = %event.invocation_uuid.short(), "ignoring foreign dispatch");
                return;
            }
            let Some(tx) = slot.lock().take() else {
                return;
            };
            if let Some(subscription) = own_registration.get() {
                subscription.unsubscribe();
            }
            // The waiter may have timed out already.
            let _ = tx.send(event.clone());
        });
        let _ = registration.set(subscription.clone());

        Self {
            invocation,
            rx,
            subscription,
        }
    }

    async fn wait(mut self, timeout: Option<Duration>) -> Result<Option<DispatchEvent>> {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received.map(Some),
                Err(_elapsed) => Ok(None),
            },
            None => (&mut self.rx).await.map(Some),
        };
        self.subscription.unsubscribe();
        outcome.map_err(|_| InterceptError::ListenerDropped(self.invocation.clone()))
    }
}

// A call future dropped mid-wait must not leave its listener on the bus.
impl Drop for PendingDispatch {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

fn encode_args<A: Serialize>(args: &A) -> Result<Vec<Value>> {
    match serde_json::to_value(args) {
        Ok(Value::Array(values)) => Ok(values),
        Ok(other) => Err(InterceptError::ArgumentsNotArray(other.to_string())),
        Err(source) => Err(InterceptError::Encode {
            what: "arguments",
            source,
        }),
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &'static str) -> Result<T> {
    serde_json::from_value(value).map_err(|source| InterceptError::Decode { what, source })
}

fn deadline_ms(timeout: Duration) -> i64 {
    let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    chrono::Utc::now().timestamp_millis().saturating_add(timeout_ms)
}
