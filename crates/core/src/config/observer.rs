//! Config observer bus: fan-out of change events to subscribers.
//!
//! Subscribers register a handler; publication holds the subscriber-list
//! mutex only while copying the list, then calls handlers outside the
//! lock in registration order. A handler that panics is isolated —
//! caught with `catch_unwind` so the remaining subscribers still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ConfigUpdateEvent {
    pub changed_keys: Vec<String>,
    pub source: String,
    pub update_id: String,
}

pub type Handler = Box<dyn Fn(&ConfigUpdateEvent) + Send + Sync>;

pub struct ObserverBus {
    subscribers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
    next_update_id: AtomicU64,
}

/// Opaque handle returned by `subscribe`; pass to `unsubscribe` to cancel
/// exactly one delivery (duplicate subscriptions of the same handler are
/// permitted and yield duplicate deliveries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            next_update_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().push((id, handler));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(pos) = subs.iter().position(|(sid, _)| *sid == id.0) {
            subs.remove(pos);
        }
    }

    /// Publish a change event. Copies the subscriber list under the lock,
    /// drops the lock, then invokes handlers in registration order so a
    /// handler that itself publishes (e.g. reacting to `dedup_mode`)
    /// cannot deadlock on the bus's own mutex.
    pub fn publish(&self, changed_keys: Vec<String>, source: &str) {
        let update_id = self.next_update_id.fetch_add(1, Ordering::Relaxed);
        let event = ConfigUpdateEvent {
            changed_keys,
            source: source.to_string(),
            update_id: update_id.to_string(),
        };

        self.publish_by_index(&event);
    }

    /// `Box<dyn Fn>` subscribers can't be cloned into a snapshot, so each
    /// slot is re-locked by index instead — still holds the mutex only
    /// while copying/looking up, never while a handler runs.
    fn publish_by_index(&self, event: &ConfigUpdateEvent) {
        let len = self.subscribers.lock().unwrap().len();
        for i in 0..len {
            // Re-lock per call so a handler that subscribes/unsubscribes
            // from within its own callback can't hold the bus mutex.
            let called = {
                let subs = self.subscribers.lock().unwrap();
                match subs.get(i) {
                    Some((_, handler)) => {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                        if let Err(_payload) = result {
                            tracing::error!("config observer handler panicked; isolating and continuing");
                        }
                        true
                    }
                    None => false,
                }
            };
            if !called {
                break;
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
