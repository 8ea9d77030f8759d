//! Bus-to-peer bridge.
//!
//! A [`BusBridge`] subscribes to every event on a local bus and queues its
//! encoded frame on an outbound channel; whatever owns the socket drains that
//! channel. Frames from the peer go through [`BusBridge::handle_frame`] and
//! are published on the local bus, where the bus prepends its own ID.
//!
//! The first entry of a received frame's `sourceUuid` is the bus that sent
//! it, so the bridge learns its peer's bus IDs as frames arrive. Local events
//! whose chain already contains a peer are not sent back. The bus loop guard
//! still stops anything that slips through (for example an echo sent before
//! the first frame from the peer arrived).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, trace, warn};
use waylay_bus::bus::{EventBus, Subscription};
use waylay_core::ids::BusId;
use waylay_core::protocol::InterceptEvent;

use crate::codec::{decode_frame, encode_event};
use crate::errors::Result;

struct BridgeInner {
    bus: EventBus,
    outbound: mpsc::Sender<String>,
    peers: Mutex<HashSet<BusId>>,
    subscription: Mutex<Option<Subscription>>,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Connection between a local bus and one remote peer.
#[derive(Clone)]
pub struct BusBridge {
    inner: Arc<BridgeInner>,
}

impl BusBridge {
    /// Start forwarding local events from `bus` to `outbound`.
    pub fn attach(bus: &EventBus, outbound: mpsc::Sender<String>) -> Self {
        let inner = Arc::new(BridgeInner {
            bus: bus.clone(),
            outbound,
            peers: Mutex::new(HashSet::new()),
            subscription: Mutex::new(None),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let weak: Weak<BridgeInner> = Arc::downgrade(&inner);
        let subscription = bus.on_event(move |event| {
            if let Some(inner) = weak.upgrade() {
                forward(&inner, event);
            }
        });
        *inner.subscription.lock() = Some(subscription);
        debug!(bus = %bus.id().short(), "bridge attached");

        Self { inner }
    }

    /// Publish a frame received from the peer on the local bus.
    ///
    /// Malformed frames are logged and returned as errors; the bridge stays
    /// usable.
    pub fn handle_frame(&self, text: &str) -> Result<()> {
        let event = match decode_frame(text) {
            Ok(event) => event,
            Err(err) => {
                error!(bus = %self.inner.bus.id().short(), error = %err, len = text.len(), "dropping malformed frame");
                return Err(err);
            }
        };
        if let Some(sender) = event.source_uuid().first() {
            if self.inner.peers.lock().insert(sender.clone()) {
                debug!(bus = %self.inner.bus.id().short(), peer = %sender.short(), "learned peer bus");
            }
        }
        trace!(
            bus = %self.inner.bus.id().short(),
            direction = %event.direction(),
            invocation = %event.invocation_uuid().short(),
            "frame from peer"
        );
        self.inner.bus.publish(event);
        Ok(())
    }

    /// Stop forwarding. Idempotent.
    pub fn detach(&self) {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            subscription.unsubscribe();
            debug!(
                bus = %self.inner.bus.id().short(),
                forwarded = self.forwarded_count(),
                dropped = self.drop_count(),
                "bridge detached"
            );
        }
    }

    /// Whether the bridge is still forwarding.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Local bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Peer bus IDs learned so far.
    #[must_use]
    pub fn peers(&self) -> Vec<BusId> {
        self.inner.peers.lock().iter().cloned().collect()
    }

    /// Frames queued for the peer.
    #[must_use]
    pub fn forwarded_count(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }

    /// Frames dropped because the outbound channel was full.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

fn forward(inner: &BridgeInner, event: &InterceptEvent) {
    let echo = {
        let peers = inner.peers.lock();
        event.source_uuid().iter().any(|hop| peers.contains(hop))
    };
    if echo {
        trace!(invocation = %event.invocation_uuid().short(), "not echoing event back to its peer");
        return;
    }

    let frame = match encode_event(event) {
        Ok(frame) => frame,
        Err(err) => {
            error!(error = %err, invocation = %event.invocation_uuid().short(), "failed to encode event");
            return;
        }
    };

    match inner.outbound.try_send(frame) {
        Ok(()) => {
            let _ = inner.forwarded.fetch_add(1, Ordering::Relaxed);
        }
        Err(TrySendError::Full(_)) => {
            let dropped = inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                bus = %inner.bus.id().short(),
                invocation = %event.invocation_uuid().short(),
                dropped,
                "outbound channel full, dropping frame"
            );
        }
        Err(TrySendError::Closed(_)) => {
            trace!(bus = %inner.bus.id().short(), "outbound channel closed");
        }
    }
}

impl std::fmt::Debug for BusBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusBridge")
            .field("bus", self.inner.bus.id())
            .field("peers", &self.inner.peers.lock().len())
            .field("forwarded", &self.forwarded_count())
            .field("dropped", &self.drop_count())
            .finish()
    }
}
