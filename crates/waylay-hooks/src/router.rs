//! Hook router.
//!
//! Subscribes to a bus and decides, for every capture, whether a human has to
//! look at it. Rules are evaluated newest first; the first rule that is not
//! exhausted and whose mask matches the interceptor ID wins and has its hit
//! bookkeeping updated. Captures no rule matches are left alone: the
//! interceptor simply runs into its timeout.
//!
//! The router also watches dispatches. Whoever resolves an invocation (this
//! router, an operator elsewhere on a bridged bus) causes the matching entry
//! to leave the queue.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use waylay_bus::bus::{EventBus, Subscription};
use waylay_core::hooks::{HookAction, HookConfiguration, HookSetup};
use waylay_core::ids::{InvocationId, RuleId, call_tag};
use waylay_core::protocol::{CaptureEvent, DispatchEvent};

use crate::errors::{HookError, Result, SubmitError};
use crate::queue::SuspensionQueue;
use crate::rule::HookRule;

struct RouterInner {
    bus: EventBus,
    rules: Mutex<Vec<HookRule>>,
    queue: SuspensionQueue,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Rule-driven resolver for captures on one bus. Cloning shares the router.
#[derive(Clone)]
pub struct HookRouter {
    inner: Arc<RouterInner>,
}

impl HookRouter {
    /// Router over `bus` with no rules. Call [`attach`](Self::attach) to
    /// start routing.
    #[must_use]
    pub fn new(bus: &EventBus) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                bus: bus.clone(),
                rules: Mutex::new(Vec::new()),
                queue: SuspensionQueue::new(),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Add the catch-all suspend rule an operator console starts with.
    #[must_use]
    pub fn with_default_rule(self) -> Self {
        if let Err(error) = self.add_rule(&HookSetup::suspend_all()) {
            warn!(%error, "default rule rejected");
        }
        self
    }

    /// Subscribe to the bus. No-op if already attached.
    pub fn attach(&self) {
        let mut subscriptions = self.inner.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }
        let bus = &self.inner.bus;

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(bus.on_capture(move |event| {
            if let Some(router) = upgrade(&weak) {
                let _ = router.handle_capture(event);
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(bus.on_dispatch(move |event| {
            if let Some(router) = upgrade(&weak) {
                router.handle_dispatch(event);
            }
        }));
        debug!(bus = %bus.id().short(), "hook router attached");
    }

    /// Stop routing. Queued events and rules are kept.
    pub fn detach(&self) {
        let subscriptions: Vec<Subscription> = self.inner.subscriptions.lock().drain(..).collect();
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        if !subscriptions.is_empty() {
            debug!(bus = %self.inner.bus.id().short(), "hook router detached");
        }
    }

    /// Whether the router is subscribed to its bus.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.inner.subscriptions.lock().is_empty()
    }

    /// Bus this router listens on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Add a rule in front of all existing ones.
    pub fn add_rule(&self, setup: &HookSetup) -> Result<RuleId> {
        let rule = HookRule::from_setup(setup)?;
        Ok(self.insert_rule(rule))
    }

    fn insert_rule(&self, rule: HookRule) -> RuleId {
        let id = rule.id().clone();
        info!(
            rule = %id.short(),
            mask = rule.mask(),
            action = %rule.action(),
            delay_ms = rule.delay_ms(),
            hit_limit = rule.hit_limit(),
            "hook rule added"
        );
        self.inner.rules.lock().insert(0, rule);
        id
    }

    /// Remove the rule at `index` (0 is the newest).
    pub fn remove_rule(&self, index: usize) -> Result<HookRule> {
        let mut rules = self.inner.rules.lock();
        if index >= rules.len() {
            return Err(HookError::IndexOutOfRange {
                index,
                len: rules.len(),
            });
        }
        let rule = rules.remove(index);
        info!(rule = %rule.id().short(), mask = rule.mask(), "hook rule removed");
        Ok(rule)
    }

    /// Remove the rule with `id`.
    pub fn remove_rule_by_id(&self, id: &RuleId) -> Option<HookRule> {
        let mut rules = self.inner.rules.lock();
        let index = rules.iter().position(|r| r.id() == id)?;
        let rule = rules.remove(index);
        info!(rule = %id.short(), mask = rule.mask(), "hook rule removed");
        Some(rule)
    }

    /// Copy of the rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> Vec<HookRule> {
        self.inner.rules.lock().clone()
    }

    /// Events waiting for a manual decision.
    #[must_use]
    pub fn queue(&self) -> &SuspensionQueue {
        &self.inner.queue
    }

    /// Route one capture. Returns the action taken, `None` if no rule
    /// matched.
    pub fn handle_capture(&self, event: &CaptureEvent) -> Option<HookAction> {
        let tag = call_tag(&event.interceptor_uuid, &event.invocation_uuid);
        let matched = {
            let mut rules = self.inner.rules.lock();
            rules
                .iter_mut()
                .find(|rule| rule.matches(&event.interceptor_uuid))
                .map(|rule| {
                    rule.record_hit();
                    (rule.id().clone(), rule.action(), rule.delay_ms())
                })
        };

        let Some((rule, action, delay_ms)) = matched else {
            info!(call = %tag, trigger = %event.trigger(), "no hook rule matched, ignoring capture");
            return None;
        };

        match action {
            HookAction::PassThrough => {
                debug!(call = %tag, rule = %rule.short(), delay_ms, "passing through");
                self.pass_through(event.to_dispatch(), delay_ms);
            }
            HookAction::Suspend => {
                let _ = self
                    .inner
                    .queue
                    .prune_expired(chrono::Utc::now().timestamp_millis());
                info!(call = %tag, rule = %rule.short(), trigger = %event.trigger(), "suspending capture");
                self.inner.queue.push(event.clone());
            }
        }
        Some(action)
    }

    fn pass_through(&self, dispatch: DispatchEvent, delay_ms: u64) {
        if delay_ms == 0 {
            self.inner.bus.dispatch(dispatch);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let bus = self.inner.bus.clone();
                drop(handle.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    bus.dispatch(dispatch);
                }));
            }
            Err(_) => {
                warn!(delay_ms, "no tokio runtime for delayed pass-through, dispatching now");
                self.inner.bus.dispatch(dispatch);
            }
        }
    }

    fn handle_dispatch(&self, event: &DispatchEvent) {
        let resolved = self
            .inner
            .queue
            .remove_if(&event.invocation_uuid, |queued| queued.is_resolved_by(event));
        if resolved.is_some() {
            debug!(
                call = %call_tag(&event.interceptor_uuid, &event.invocation_uuid),
                "queued capture resolved elsewhere"
            );
        }
    }

    /// Resolve the queued capture for `invocation` with `payload`.
    ///
    /// `payload` is the new argument array for call captures and the new
    /// return value otherwise. When the capture forbids free-form edits it
    /// must equal the original value or one of the suggestions. With
    /// `new_rule`, future captures from the same interceptor are handled by
    /// an unbounded rule matching exactly its ID.
    ///
    /// On error nothing changes and the capture stays queued.
    pub fn submit(
        &self,
        invocation: &InvocationId,
        payload: Value,
        new_rule: Option<HookConfiguration>,
    ) -> std::result::Result<DispatchEvent, SubmitError> {
        let (event, (dispatch, rule)) = self
            .inner
            .queue
            .take_if(invocation, |event| -> std::result::Result<_, SubmitError> {
                if !event.accepts(&payload) {
                    return Err(SubmitError::NotSuggested(invocation.clone()));
                }
                let dispatch = event
                    .resolve_with(payload)
                    .ok_or_else(|| SubmitError::InvalidArguments(invocation.clone()))?;
                let rule = new_rule
                    .map(|config| HookRule::exact(&event.interceptor_uuid, config))
                    .transpose()?;
                Ok((dispatch, rule))
            })
            .ok_or_else(|| SubmitError::NotQueued(invocation.clone()))??;

        if let Some(rule) = rule {
            let _ = self.insert_rule(rule);
        }
        info!(
            call = %call_tag(&event.interceptor_uuid, invocation),
            trigger = %dispatch.trigger(),
            "submitting manual decision"
        );
        self.inner.bus.dispatch(dispatch.clone());
        Ok(dispatch)
    }

    /// [`submit`](Self::submit) with the value given as JSON text.
    pub fn submit_json(
        &self,
        invocation: &InvocationId,
        text: &str,
        new_rule: Option<HookConfiguration>,
    ) -> std::result::Result<DispatchEvent, SubmitError> {
        if self.inner.queue.get(invocation).is_none() {
            return Err(SubmitError::NotQueued(invocation.clone()));
        }
        let payload = serde_json::from_str(text).map_err(SubmitError::InvalidJson)?;
        self.submit(invocation, payload, new_rule)
    }
}

fn upgrade(weak: &Weak<RouterInner>) -> Option<HookRouter> {
    weak.upgrade().map(|inner| HookRouter { inner })
}

impl std::fmt::Debug for HookRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRouter")
            .field("bus", self.inner.bus.id())
            .field("rules", &self.inner.rules.lock().len())
            .field("queued", &self.inner.queue.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::time::Instant;
    use tracing::Level;
    use waylay_bus::interceptor::{InterceptOptions, intercept};
    use waylay_core::hooks::UNBOUNDED_HITS;
    use waylay_core::logging::capture_logs;
    use waylay_core::protocol::{CapturePayload, DispatchOption, Trigger};

    fn call_capture(interceptor: &str, invocation: &str, args: Value) -> CaptureEvent {
        let Value::Array(args) = args else {
            panic!("args must be an array");
        };
        CaptureEvent {
            interceptor_uuid: interceptor.into(),
            invocation_uuid: invocation.into(),
            source_uuid: Vec::new(),
            payload: CapturePayload::Call {
                args,
                dispatch_options_arguments: None,
            },
            dispatch_option_override: None,
            expire_at: None,
        }
    }

    fn guarded_capture(invocation: &str) -> CaptureEvent {
        let mut event = call_capture("icpt", invocation, json!([7]));
        event.payload = CapturePayload::Call {
            args: vec![json!(7)],
            dispatch_options_arguments: Some(vec![DispatchOption::labelled("abc", json!([1, 2, 3]))]),
        };
        event.dispatch_option_override = Some(false);
        event
    }

    fn dispatch_recorder(bus: &EventBus) -> Arc<Mutex<Vec<DispatchEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = bus.on_dispatch(move |event| sink.lock().push(event.clone()));
        seen
    }

    async fn wait_for_queue(router: &HookRouter) -> CaptureEvent {
        loop {
            if let Some(event) = router.queue().snapshot().into_iter().next() {
                return event;
            }
            tokio::task::yield_now().await;
        }
    }

    // --- rules ---

    #[test]
    fn newest_rule_wins() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus);
        let _ = router.add_rule(&HookSetup::new("X", HookAction::PassThrough)).unwrap();
        let _ = router.add_rule(&HookSetup::new("X", HookAction::Suspend)).unwrap();

        let action = router.handle_capture(&call_capture("X", "inv-1", json!([])));
        assert_eq!(action, Some(HookAction::Suspend));
        assert_eq!(router.queue().len(), 1);
    }

    #[test]
    fn removal_keeps_insertion_order() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus);
        let first = router.add_rule(&HookSetup::new("X", HookAction::PassThrough)).unwrap();
        let second = router.add_rule(&HookSetup::new("X", HookAction::Suspend)).unwrap();
        let third = router.add_rule(&HookSetup::new("X", HookAction::Suspend)).unwrap();

        let removed = router.remove_rule(1).unwrap();
        assert_eq!(removed.id(), &second);

        let order: Vec<RuleId> = router.rules().iter().map(|r| r.id().clone()).collect();
        assert_eq!(order, vec![third.clone(), first.clone()]);

        let _ = router.handle_capture(&call_capture("X", "inv-1", json!([])));
        let rules = router.rules();
        assert_eq!(rules[0].hit_count(), 1);
        assert_eq!(rules[1].hit_count(), 0);

        let _ = router.remove_rule_by_id(&third).unwrap();
        assert_eq!(
            router.handle_capture(&call_capture("X", "inv-2", json!([]))),
            Some(HookAction::PassThrough)
        );
    }

    #[test]
    fn remove_rule_out_of_range() {
        let router = HookRouter::new(&EventBus::new());
        assert_matches!(
            router.remove_rule(0),
            Err(HookError::IndexOutOfRange { index: 0, len: 0 })
        );
        assert!(router.remove_rule_by_id(&RuleId::from("missing")).is_none());
    }

    #[test]
    fn invalid_mask_is_rejected() {
        let router = HookRouter::new(&EventBus::new());
        assert_matches!(
            router.add_rule(&HookSetup::new("(", HookAction::Suspend)),
            Err(HookError::InvalidMask { .. })
        );
        assert!(router.rules().is_empty());
    }

    #[test]
    fn hit_limit_exhaustion() {
        let bus = EventBus::new();
        let seen = dispatch_recorder(&bus);
        let router = HookRouter::new(&bus);
        let _ = router
            .add_rule(&HookSetup::new("X", HookAction::PassThrough).with_hit_limit(1))
            .unwrap();

        assert_eq!(
            router.handle_capture(&call_capture("X", "inv-1", json!([1]))),
            Some(HookAction::PassThrough)
        );
        assert_eq!(router.handle_capture(&call_capture("X", "inv-2", json!([2]))), None);

        assert_eq!(seen.lock().len(), 1);
        let rule = &router.rules()[0];
        assert_eq!(rule.hit_count(), 1);
        assert_eq!(rule.hit_limit(), 0);
    }

    #[test]
    fn mask_matches_anywhere_in_id() {
        let router = HookRouter::new(&EventBus::new());
        let _ = router.add_rule(&HookSetup::new("fetch", HookAction::Suspend)).unwrap();
        assert!(router.handle_capture(&call_capture("api.fetch.user", "inv", json!([]))).is_some());
        assert!(router.handle_capture(&call_capture("api.store", "inv-2", json!([]))).is_none());
    }

    #[test]
    fn unmatched_capture_is_logged_and_ignored() {
        let (logs, _guard) = capture_logs();
        let router = HookRouter::new(&EventBus::new());

        assert!(router.handle_capture(&call_capture("X", "inv", json!([]))).is_none());
        assert!(router.queue().is_empty());
        assert!(logs.has_event(Level::INFO, "no hook rule matched"));
    }

    #[test]
    fn default_rule_suspends_everything() {
        let router = HookRouter::new(&EventBus::new()).with_default_rule();
        let rules = router.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].mask(), ".*");
        assert_eq!(rules[0].hit_limit(), UNBOUNDED_HITS);
        assert_eq!(
            router.handle_capture(&call_capture("anything", "inv", json!([]))),
            Some(HookAction::Suspend)
        );
    }

    #[test]
    fn pass_through_mirrors_capture_with_empty_source() {
        let bus = EventBus::new();
        let seen = dispatch_recorder(&bus);
        let router = HookRouter::new(&bus);
        let _ = router.add_rule(&HookSetup::new(".*", HookAction::PassThrough)).unwrap();

        let mut event = call_capture("X", "inv-1", json!([1, "two"]));
        event.source_uuid = vec!["elsewhere".into()];
        let _ = router.handle_capture(&event);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].invocation_uuid.as_str(), "inv-1");
        // only this bus's own hop
        assert_eq!(seen[0].source_uuid, vec![bus.id().clone()]);
        assert_eq!(seen[0].payload, DispatchEvent::call("X".into(), "inv-1".into(), vec![json!(1), json!("two")]).payload);
    }

    #[test]
    fn delayed_pass_through_without_runtime_dispatches_now() {
        let bus = EventBus::new();
        let seen = dispatch_recorder(&bus);
        let router = HookRouter::new(&bus);
        let _ = router
            .add_rule(&HookSetup::new(".*", HookAction::PassThrough).with_delay_ms(500))
            .unwrap();

        let _ = router.handle_capture(&call_capture("X", "inv", json!([])));
        assert_eq!(seen.lock().len(), 1);
    }

    // --- attached to interceptors ---

    #[tokio::test]
    async fn pass_through_resolves_interceptor_synchronously() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus);
        router.attach();
        let _ = router.add_rule(&HookSetup::new(".*", HookAction::PassThrough)).unwrap();

        let square = intercept(&bus, |(x,): (i64,)| async move { x * x }, InterceptOptions::new(Trigger::Both));
        assert_eq!(square.call((4,)).await.unwrap(), 16);
        assert_eq!(router.rules()[0].hit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_pass_through_waits() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus);
        router.attach();
        let _ = router
            .add_rule(&HookSetup::new(".*", HookAction::PassThrough).with_delay_ms(200))
            .unwrap();

        let double = intercept(&bus, |(x,): (i64,)| async move { x * 2 }, InterceptOptions::new(Trigger::Return));
        let started = Instant::now();
        assert_eq!(double.call((21,)).await.unwrap(), 42);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn suspended_call_resolved_by_submit() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus).with_default_rule();
        router.attach();

        let square = intercept(&bus, |(x,): (i64,)| async move { x * x }, InterceptOptions::new(Trigger::Return));
        let pending = tokio::spawn(async move { square.call((3,)).await });

        let queued = wait_for_queue(&router).await;
        assert_eq!(queued.rv(), Some(&json!(9)));
        let dispatch = router.submit(&queued.invocation_uuid, json!(10), None).unwrap();
        assert_eq!(dispatch.trigger(), Trigger::Return);

        assert_eq!(pending.await.unwrap().unwrap(), 10);
        assert!(router.queue().is_empty());
    }

    #[tokio::test]
    async fn submit_with_rule_automates_future_captures() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus).with_default_rule();
        router.attach();

        let square = Arc::new(intercept(
            &bus,
            |(x,): (i64,)| async move { x * x },
            InterceptOptions::new(Trigger::Return).with_uuid("svc.square"),
        ));
        let first = tokio::spawn({
            let square = Arc::clone(&square);
            async move { square.call((2,)).await }
        });

        let queued = wait_for_queue(&router).await;
        let config = HookConfiguration {
            action: HookAction::PassThrough,
            delay_ms: 0,
        };
        let _ = router.submit(&queued.invocation_uuid, json!(4), Some(config)).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), 4);

        assert_eq!(router.rules()[0].mask(), r"^svc\.square$");
        // Now handled without an operator.
        assert_eq!(square.call((5,)).await.unwrap(), 25);
        assert!(router.queue().is_empty());
    }

    #[tokio::test]
    async fn dispatch_from_elsewhere_dequeues() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus).with_default_rule();
        router.attach();

        let square = intercept(&bus, |(x,): (i64,)| async move { x * x }, InterceptOptions::new(Trigger::Call));
        let pending = tokio::spawn(async move { square.call((3,)).await });

        let queued = wait_for_queue(&router).await;
        bus.dispatch(queued.resolve_with(json!([5])).unwrap());

        assert_eq!(pending.await.unwrap().unwrap(), 25);
        assert!(router.queue().is_empty());
    }

    #[test]
    fn dispatch_for_other_half_leaves_capture_queued() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus).with_default_rule();
        router.attach();

        let mut returned = call_capture("icpt", "inv", json!([1]));
        returned.payload = CapturePayload::Return {
            args: Some(vec![json!(1)]),
            rv: json!(2),
            dispatch_options_return_value: None,
        };
        let _ = router.handle_capture(&returned);

        bus.dispatch(DispatchEvent::call("icpt".into(), "inv".into(), vec![json!(1)]));
        assert_eq!(router.queue().len(), 1);

        bus.dispatch(DispatchEvent::returning("icpt".into(), "other".into(), json!(3)));
        assert_eq!(router.queue().len(), 1);

        bus.dispatch(DispatchEvent::returning("icpt".into(), "inv".into(), json!(3)));
        assert!(router.queue().is_empty());
    }

    #[test]
    fn detach_stops_routing() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus).with_default_rule();
        router.attach();
        router.attach();
        assert_eq!(bus.subscriber_count(), 2);

        router.detach();
        assert!(!router.is_attached());
        assert_eq!(bus.subscriber_count(), 0);

        bus.capture(call_capture("X", "inv", json!([])));
        assert!(router.queue().is_empty());
    }

    #[test]
    fn dropped_router_leaves_inert_handlers() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus).with_default_rule();
        router.attach();
        drop(router);

        bus.capture(call_capture("X", "inv", json!([])));
    }

    // --- submission ---

    #[test]
    fn suggestion_enforcement() {
        let bus = EventBus::new();
        let router = HookRouter::new(&bus).with_default_rule();
        let _ = router.handle_capture(&guarded_capture("inv-1"));
        let _ = router.handle_capture(&guarded_capture("inv-2"));
        let _ = router.handle_capture(&guarded_capture("inv-3"));

        assert_matches!(
            router.submit(&"inv-1".into(), json!([4, 5, 6]), None),
            Err(SubmitError::NotSuggested(_))
        );
        assert_eq!(router.queue().len(), 3);

        assert!(router.submit(&"inv-1".into(), json!([1, 2, 3]), None).is_ok());
        assert!(router.submit(&"inv-2".into(), json!([7]), None).is_ok());
        assert_matches!(
            router.submit_json(&"inv-3".into(), "[4,5,6]", None),
            Err(SubmitError::NotSuggested(_))
        );
        assert_eq!(router.queue().len(), 1);
    }

    #[test]
    fn racing_submissions_dispatch_once() {
        let bus = EventBus::new();
        let seen = dispatch_recorder(&bus);
        let router = HookRouter::new(&bus).with_default_rule();

        for round in 0..50 {
            let invocation = format!("inv-{round}");
            let _ = router.handle_capture(&call_capture("X", &invocation, json!([1])));

            let barrier = std::sync::Barrier::new(2);
            let outcomes: Vec<bool> = std::thread::scope(|scope| {
                let workers: Vec<_> = [json!([2]), json!([3])]
                    .into_iter()
                    .map(|payload| {
                        let (router, barrier, invocation) = (&router, &barrier, &invocation);
                        scope.spawn(move || {
                            let _ = barrier.wait();
                            router.submit(&invocation.as_str().into(), payload, None).is_ok()
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1, "round {round}");
            assert!(router.queue().is_empty());
        }
        assert_eq!(seen.lock().len(), 50);
    }

    #[test]
    fn rejected_submission_keeps_queue_position() {
        let router = HookRouter::new(&EventBus::new()).with_default_rule();
        let _ = router.handle_capture(&guarded_capture("first"));
        let _ = router.handle_capture(&guarded_capture("second"));

        assert_matches!(
            router.submit(&"first".into(), json!([0]), None),
            Err(SubmitError::NotSuggested(_))
        );
        let order: Vec<String> = router
            .queue()
            .snapshot()
            .into_iter()
            .map(|e| e.invocation_uuid.into_inner())
            .collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[test]
    fn submit_unknown_invocation() {
        let router = HookRouter::new(&EventBus::new());
        assert_matches!(
            router.submit(&"ghost".into(), json!(1), None),
            Err(SubmitError::NotQueued(_))
        );
        assert_matches!(
            router.submit_json(&"ghost".into(), "1", None),
            Err(SubmitError::NotQueued(_))
        );
    }

    #[test]
    fn submit_json_rejects_malformed_text() {
        let router = HookRouter::new(&EventBus::new()).with_default_rule();
        let _ = router.handle_capture(&call_capture("X", "inv", json!([1])));

        assert_matches!(
            router.submit_json(&"inv".into(), "[1,", None),
            Err(SubmitError::InvalidJson(_))
        );
        assert_eq!(router.queue().len(), 1);
    }

    #[test]
    fn call_submission_requires_array() {
        let router = HookRouter::new(&EventBus::new()).with_default_rule();
        let _ = router.handle_capture(&call_capture("X", "inv", json!([1])));

        assert_matches!(
            router.submit(&"inv".into(), json!({"a": 1}), None),
            Err(SubmitError::InvalidArguments(_))
        );
        assert_eq!(router.queue().len(), 1);
        assert_eq!(router.rules().len(), 1);
    }

    #[test]
    fn submit_json_dispatches_parsed_value() {
        let bus = EventBus::new();
        let seen = dispatch_recorder(&bus);
        let router = HookRouter::new(&bus).with_default_rule();
        let _ = router.handle_capture(&call_capture("X", "inv", json!([1])));

        let dispatch = router.submit_json(&"inv".into(), r#"[2, "b"]"#, None).unwrap();
        assert_eq!(dispatch.payload, DispatchEvent::call("X".into(), "inv".into(), vec![json!(2), json!("b")]).payload);
        assert_eq!(seen.lock().len(), 1);
        assert!(router.queue().is_empty());
    }

    #[test]
    fn debug_impl() {
        let router = HookRouter::new(&EventBus::new()).with_default_rule();
        let debug = format!("{router:?}");
        assert!(debug.contains("HookRouter"));
        assert!(debug.contains("rules: 1"));
    }
}
