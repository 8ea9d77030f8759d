//! Suspension queue.
//!
//! Captures the router chose not to resolve automatically wait here for an
//! operator. Entries are keyed by invocation ID: an invocation has at most
//! one outstanding wait, so pushing a second capture for the same invocation
//! (its return half, say) replaces the first.

use parking_lot::Mutex;
use tracing::debug;
use waylay_core::ids::InvocationId;
use waylay_core::protocol::CaptureEvent;

/// Captured events awaiting a manual decision, oldest first.
#[derive(Debug, Default)]
pub struct SuspensionQueue {
    entries: Mutex<Vec<CaptureEvent>>,
}

impl SuspensionQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `event`, replacing any entry for the same invocation.
    pub fn push(&self, event: CaptureEvent) {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.invocation_uuid == event.invocation_uuid)
        {
            debug!(invocation = %event.invocation_uuid.short(), "replacing queued capture");
            *existing = event;
        } else {
            entries.push(event);
        }
    }

    /// Take the entry for `invocation` out of the queue.
    pub fn remove(&self, invocation: &InvocationId) -> Option<CaptureEvent> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|e| &e.invocation_uuid == invocation)?;
        Some(entries.remove(index))
    }

    /// Run `check` on the entry for `invocation` and take it out of the
    /// queue only if `check` succeeds. The lock is held throughout, so two
    /// callers can never both take the same entry.
    ///
    /// `None` when nothing is queued for `invocation`.
    pub fn take_if<T, E>(
        &self,
        invocation: &InvocationId,
        check: impl FnOnce(&CaptureEvent) -> Result<T, E>,
    ) -> Option<Result<(CaptureEvent, T), E>> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|e| &e.invocation_uuid == invocation)?;
        Some(check(&entries[index]).map(|value| (entries.remove(index), value)))
    }

    /// Take the entry for `invocation` if `remove` approves it.
    pub fn remove_if(
        &self,
        invocation: &InvocationId,
        remove: impl FnOnce(&CaptureEvent) -> bool,
    ) -> Option<CaptureEvent> {
        match self.take_if(invocation, |e| if remove(e) { Ok(()) } else { Err(()) })? {
            Ok((event, ())) => Some(event),
            Err(()) => None,
        }
    }

    /// Copy of the entry for `invocation`.
    #[must_use]
    pub fn get(&self, invocation: &InvocationId) -> Option<CaptureEvent> {
        self.entries
            .lock()
            .iter()
            .find(|e| &e.invocation_uuid == invocation)
            .cloned()
    }

    /// Copy of every entry, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CaptureEvent> {
        self.entries.lock().clone()
    }

    /// Number of parked events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop entries whose interceptor has stopped waiting at `now_ms`.
    /// Returns how many were dropped.
    pub fn prune_expired(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !e.is_expired(now_ms));
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, "pruned expired captures");
        }
        pruned
    }
}
