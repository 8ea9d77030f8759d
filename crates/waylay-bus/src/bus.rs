//! Directional publish/subscribe hub.
//!
//! Subscribers register for captures, dispatches, or every event. Fan-out is
//! synchronous on the publishing thread. The registry lock is released before
//! any handler runs, so handlers may re-enter the bus (subscribe, unsubscribe,
//! or publish a follow-up event).
//!
//! Every subscriber receives a copy of the event with this bus's ID prepended
//! to `sourceUuid`. An event whose chain already contains this bus's ID is
//! dropped with a warning; with bridged buses this is the only thing that
//! stops an event from bouncing between them forever.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use waylay_core::ids::BusId;
use waylay_core::protocol::{CaptureEvent, DispatchEvent, InterceptEvent};

type Handler = Arc<dyn Fn(&InterceptEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

impl Registry {
    fn contains(&self, id: u64) -> bool {
        self.handlers.iter().any(|(h, _)| *h == id)
    }
}

struct BusInner {
    id: BusId,
    registry: Mutex<Registry>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.handlers.len();
        registry.handlers.retain(|(h, _)| *h != id);
        registry.handlers.len() < before
    }
}

/// Handle to an event bus. Cloning shares the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with a random ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(BusId::new())
    }

    /// Create a bus with a fixed ID.
    #[must_use]
    pub fn with_id(id: BusId) -> Self {
        Self {
            inner: Arc::new(BusInner {
                id,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// This bus's ID, as it appears in `sourceUuid` chains.
    #[must_use]
    pub fn id(&self) -> &BusId {
        &self.inner.id
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.lock().handlers.len()
    }

    /// Subscribe to capture events.
    pub fn on_capture<H>(&self, handler: H) -> Subscription
    where
        H: Fn(&CaptureEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(move |event: &InterceptEvent| {
            if let InterceptEvent::Capture(capture) = event {
                handler(capture);
            }
        }))
    }

    /// Subscribe to dispatch events.
    pub fn on_dispatch<H>(&self, handler: H) -> Subscription
    where
        H: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(move |event: &InterceptEvent| {
            if let InterceptEvent::Dispatch(dispatch) = event {
                handler(dispatch);
            }
        }))
    }

    /// Subscribe to every event regardless of direction.
    pub fn on_event<H>(&self, handler: H) -> Subscription
    where
        H: Fn(&InterceptEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(handler))
    }

    /// Subscribe to events accepted by `filter`.
    pub fn on_event_filtered<H, P>(&self, handler: H, filter: P) -> Subscription
    where
        H: Fn(&InterceptEvent) + Send + Sync + 'static,
        P: Fn(&InterceptEvent) -> bool + Send + Sync + 'static,
    {
        self.register(Arc::new(move |event: &InterceptEvent| {
            if filter(event) {
                handler(event);
            }
        }))
    }

    /// Publish a capture event.
    pub fn capture(&self, event: CaptureEvent) {
        debug!(
            bus = %self.inner.id.short(),
            interceptor = %event.interceptor_uuid.short(),
            invocation = %event.invocation_uuid.short(),
            trigger = %event.trigger(),
            "capture"
        );
        self.fan_out(&InterceptEvent::Capture(event));
    }

    /// Publish a dispatch event.
    pub fn dispatch(&self, event: DispatchEvent) {
        debug!(
            bus = %self.inner.id.short(),
            interceptor = %event.interceptor_uuid.short(),
            invocation = %event.invocation_uuid.short(),
            trigger = %event.trigger(),
            "dispatch"
        );
        self.fan_out(&InterceptEvent::Dispatch(event));
    }

    /// Publish an event of either direction.
    pub fn publish(&self, event: InterceptEvent) {
        match event {
            InterceptEvent::Capture(capture) => self.capture(capture),
            InterceptEvent::Dispatch(dispatch) => self.dispatch(dispatch),
        }
    }

    fn register(&self, handler: Handler) -> Subscription {
        let mut registry = self.inner.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, handler));
        trace!(bus = %self.inner.id.short(), subscriber = id, "subscribed");
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn fan_out(&self, event: &InterceptEvent) {
        let bus = &self.inner.id;
        if event.has_passed(bus) {
            warn!(
                bus = %bus.short(),
                direction = %event.direction(),
                invocation = %event.invocation_uuid().short(),
                "dropping loopback event"
            );
            return;
        }

        let relayed = event.relayed_by(bus);
        let snapshot: Vec<(u64, Handler)> = self.inner.registry.lock().handlers.clone();
        for (id, handler) in snapshot {
            // An earlier handler in this round may have unsubscribed it.
            if !self.inner.registry.lock().contains(id) {
                continue;
            }
            trace!(bus = %bus.short(), subscriber = id, "notify");
            handler(&relayed);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.inner.id)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Registration returned by the `on_*` methods.
///
/// Dropping a subscription does not end it; call
/// [`unsubscribe`](Subscription::unsubscribe).
#[derive(Clone, Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    /// Stop receiving events. Idempotent, and a no-op once the bus is gone.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(self.id) {
                trace!(bus = %bus.id.short(), subscriber = self.id, "unsubscribed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::Level;
    use waylay_core::logging::capture_logs;
    use waylay_core::protocol::CapturePayload;

    fn capture(invocation: &str) -> CaptureEvent {
        CaptureEvent {
            interceptor_uuid: "icpt".into(),
            invocation_uuid: invocation.into(),
            source_uuid: Vec::new(),
            payload: CapturePayload::Call {
                args: vec![json!(1)],
                dispatch_options_arguments: None,
            },
            dispatch_option_override: None,
            expire_at: None,
        }
    }

    fn dispatch(invocation: &str) -> DispatchEvent {
        DispatchEvent::call("icpt".into(), invocation.into(), vec![json!(2)])
    }

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &T| sink.lock().push(event.clone()))
    }

    #[test]
    fn capture_reaches_capture_subscribers_only() {
        let bus = EventBus::new();
        let (captures, on_capture) = recorder::<CaptureEvent>();
        let (dispatches, on_dispatch) = recorder::<DispatchEvent>();
        let _c = bus.on_capture(on_capture);
        let _d = bus.on_dispatch(on_dispatch);

        bus.capture(capture("v1"));

        assert_eq!(captures.lock().len(), 1);
        assert!(dispatches.lock().is_empty());
    }

    #[test]
    fn dispatch_reaches_dispatch_subscribers_only() {
        let bus = EventBus::new();
        let (captures, on_capture) = recorder::<CaptureEvent>();
        let (dispatches, on_dispatch) = recorder::<DispatchEvent>();
        let _c = bus.on_capture(on_capture);
        let _d = bus.on_dispatch(on_dispatch);

        bus.dispatch(dispatch("v1"));

        assert!(captures.lock().is_empty());
        assert_eq!(dispatches.lock().len(), 1);
    }

    #[test]
    fn on_event_sees_both_directions() {
        let bus = EventBus::new();
        let (events, on_event) = recorder::<InterceptEvent>();
        let _s = bus.on_event(on_event);

        bus.capture(capture("v1"));
        bus.dispatch(dispatch("v1"));

        assert_eq!(events.lock().len(), 2);
    }

    #[test]
    fn on_event_filtered_applies_filter() {
        let bus = EventBus::new();
        let (events, on_event) = recorder::<InterceptEvent>();
        let _s = bus.on_event_filtered(on_event, |e| e.invocation_uuid().as_str() == "wanted");

        bus.capture(capture("other"));
        bus.capture(capture("wanted"));

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].invocation_uuid().as_str(), "wanted");
    }

    #[test]
    fn subscribers_see_source_prefixed_copy() {
        let bus = EventBus::with_id(BusId::from("bus-a"));
        let (captures, on_capture) = recorder::<CaptureEvent>();
        let _c = bus.on_capture(on_capture);

        let mut event = capture("v1");
        event.source_uuid = vec![BusId::from("bus-z")];
        bus.capture(event);

        assert_eq!(
            captures.lock()[0].source_uuid,
            vec![BusId::from("bus-a"), BusId::from("bus-z")]
        );
    }

    #[test]
    fn loopback_event_is_dropped_with_warning() {
        let (logs, _guard) = capture_logs();
        let bus = EventBus::with_id(BusId::from("bus-a"));
        let (captures, on_capture) = recorder::<CaptureEvent>();
        let _c = bus.on_capture(on_capture);

        let mut event = capture("v1");
        event.source_uuid = vec![BusId::from("bus-b"), BusId::from("bus-a")];
        bus.capture(event);

        assert!(captures.lock().is_empty());
        assert!(logs.has_event(Level::WARN, "dropping loopback event"));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (captures, on_capture) = recorder::<CaptureEvent>();
        let sub = bus.on_capture(on_capture);
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        bus.capture(capture("v1"));

        assert_eq!(bus.subscriber_count(), 0);
        assert!(captures.lock().is_empty());
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_noop() {
        let bus = EventBus::new();
        let sub = bus.on_capture(|_| {});
        drop(bus);
        sub.unsubscribe();
    }

    #[test]
    fn dropping_subscription_keeps_it_alive() {
        let bus = EventBus::new();
        drop(bus.on_capture(|_| {}));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn handler_may_publish_reentrantly() {
        let bus = EventBus::new();
        let (dispatches, on_dispatch) = recorder::<DispatchEvent>();
        let _d = bus.on_dispatch(on_dispatch);
        let echo = bus.clone();
        let _c = bus.on_capture(move |event| echo.dispatch(event.to_dispatch()));

        bus.capture(capture("v1"));

        let dispatches = dispatches.lock();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].invocation_uuid.as_str(), "v1");
    }

    #[test]
    fn handler_unsubscribed_mid_round_is_skipped() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::default();

        let slot = Arc::clone(&victim_slot);
        let _first = bus.on_capture(move |_| {
            if let Some(victim) = slot.lock().as_ref() {
                victim.unsubscribe();
            }
        });
        let counter = Arc::clone(&calls);
        let victim = bus.on_capture(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        *victim_slot.lock() = Some(victim);

        bus.capture(capture("v1"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bridged_buses_do_not_recurse() {
        let a = EventBus::with_id(BusId::from("a"));
        let b = EventBus::with_id(BusId::from("b"));
        let hops = Arc::new(AtomicUsize::new(0));

        let to_b = b.clone();
        let counter = Arc::clone(&hops);
        let _ab = a.on_event(move |event| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            to_b.publish(event.clone());
        });
        let to_a = a.clone();
        let counter = Arc::clone(&hops);
        let _ba = b.on_event(move |event| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            to_a.publish(event.clone());
        });

        a.capture(capture("v1"));

        // a -> b -> (a drops the loopback)
        assert_eq!(hops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_routes_by_direction() {
        let bus = EventBus::new();
        let (captures, on_capture) = recorder::<CaptureEvent>();
        let (dispatches, on_dispatch) = recorder::<DispatchEvent>();
        let _c = bus.on_capture(on_capture);
        let _d = bus.on_dispatch(on_dispatch);

        bus.publish(capture("v1").into());
        bus.publish(dispatch("v1").into());

        assert_eq!(captures.lock().len(), 1);
        assert_eq!(dispatches.lock().len(), 1);
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::with_id(BusId::from("dbg"));
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("dbg"));
    }
}
