//! Lifecycle hook bus.
//!
//! [`HookBus`] is an in-process publish/subscribe surface with one typed
//! slot per lifecycle hook: `published` and `failed` on the publisher side,
//! `confirmed`, `rejected`, `timeout` and `failed` on the subscriber side.
//! Listeners run synchronously in registration order; a panicking listener
//! is caught and logged so it can never take the engine down.
//!
//! # Example
//!
//! ```rust,ignore
//! let hooks = publisher.hooks();
//! hooks.on_published(|p| println!("appended {} to {}", p.id, p.stream));
//! hooks.on_failed(|f| eprintln!("publish failed: {f:?}"));
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::error;

use crate::event::{Event, PublishEntry};

/// Payload of the `published` hook.
#[derive(Debug, Clone)]
pub struct PublishedHook {
    /// Record ID assigned by the log.
    pub id: String,

    /// Stream the record was appended to.
    pub stream: String,

    /// The entry as submitted by the caller.
    pub entry: PublishEntry,
}

/// Payload of the `failed` hook.
#[derive(Debug, Clone)]
pub enum FailedHook {
    /// An append failed; the entry never reached the log.
    Publish { entry: PublishEntry, error: String },

    /// A handler raised an error while processing a delivered event.
    Delivery { event: Event, error: String },
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Default)]
struct Slots {
    published: Vec<Listener<PublishedHook>>,
    failed: Vec<Listener<FailedHook>>,
    confirmed: Vec<Listener<Event>>,
    rejected: Vec<Listener<Event>>,
    timeout: Vec<Listener<Event>>,
}

/// Typed listener registry for lifecycle hooks.
///
/// Cloning is cheap and shares the listener set; registration may race with
/// emission, in which case emission sees a snapshot taken at emit time.
#[derive(Clone, Default)]
pub struct HookBus {
    slots: Arc<RwLock<Slots>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for successful appends.
    pub fn on_published(&self, f: impl Fn(&PublishedHook) + Send + Sync + 'static) {
        self.slots.write().unwrap().published.push(Arc::new(f));
    }

    /// Listen for publish and handler failures.
    pub fn on_failed(&self, f: impl Fn(&FailedHook) + Send + Sync + 'static) {
        self.slots.write().unwrap().failed.push(Arc::new(f));
    }

    /// Listen for confirmed (acknowledged) events.
    pub fn on_confirmed(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.slots.write().unwrap().confirmed.push(Arc::new(f));
    }

    /// Listen for events rejected to the dead-letter stream.
    pub fn on_rejected(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.slots.write().unwrap().rejected.push(Arc::new(f));
    }

    /// Listen for handler timeouts.
    pub fn on_timeout(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.slots.write().unwrap().timeout.push(Arc::new(f));
    }

    pub(crate) fn emit_published(&self, hook: &PublishedHook) {
        for listener in self.snapshot(|s| &s.published) {
            Self::guarded("published", || listener(hook));
        }
    }

    pub(crate) fn emit_failed(&self, hook: &FailedHook) {
        for listener in self.snapshot(|s| &s.failed) {
            Self::guarded("failed", || listener(hook));
        }
    }

    pub(crate) fn emit_confirmed(&self, event: &Event) {
        for listener in self.snapshot(|s| &s.confirmed) {
            Self::guarded("confirmed", || listener(event));
        }
    }

    pub(crate) fn emit_rejected(&self, event: &Event) {
        for listener in self.snapshot(|s| &s.rejected) {
            Self::guarded("rejected", || listener(event));
        }
    }

    pub(crate) fn emit_timeout(&self, event: &Event) {
        for listener in self.snapshot(|s| &s.timeout) {
            Self::guarded("timeout", || listener(event));
        }
    }

    fn snapshot<T>(&self, pick: impl FnOnce(&Slots) -> &Vec<Listener<T>>) -> Vec<Listener<T>> {
        pick(&self.slots.read().unwrap()).clone()
    }

    fn guarded(hook: &'static str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            error!(hook = hook, "hook listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_event() -> Event {
        Event {
            id: "1-0".to_string(),
            stream: "users".to_string(),
            action: "u_created".to_string(),
            attempt: 0,
            headers: Default::default(),
            payload: json!({}),
        }
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let bus = HookBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.on_confirmed(move |_| order.lock().unwrap().push(tag));
        }

        bus.emit_confirmed(&test_event());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_emission() {
        let bus = HookBus::new();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.on_timeout(|_| panic!("listener bug"));
        {
            let reached = reached.clone();
            bus.on_timeout(move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit_timeout(&test_event());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slots_are_independent() {
        let bus = HookBus::new();
        let confirmed = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicUsize::new(0));

        {
            let confirmed = confirmed.clone();
            bus.on_confirmed(move |_| {
                confirmed.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let rejected = rejected.clone();
            bus.on_rejected(move |_| {
                rejected.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit_confirmed(&test_event());
        bus.emit_confirmed(&test_event());
        bus.emit_rejected(&test_event());

        assert_eq!(confirmed.load(Ordering::SeqCst), 2);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }
}
