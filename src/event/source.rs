//! Event source: publishes to at most one subscribed listener per label.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::EventData;
use super::listener::EventListener;
use super::registry::{self, EventLabel};

/// Wakes a listener's owning loop. Workers implement this with an
/// `mio::Waker`; tests can use a plain closure.
pub type WakeFn = Arc<dyn Fn() + Send + Sync>;

struct Subscription {
    listener: Arc<EventListener>,
    wake: WakeFn,
}

/// A publication point for one or more event labels. May be published to
/// from any thread; the subscribed listener's callback always runs on the
/// loop thread it is bound to, because `publish` only enqueues and
/// (optionally) wakes that loop rather than invoking the callback inline.
#[derive(Default)]
pub struct EventSource {
    subscriptions: Mutex<HashMap<EventLabel, Subscription>>,
    silent: Mutex<HashMap<EventLabel, bool>>,
}

impl EventSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to `label`, replacing any prior subscription
    /// (and logging a warning, since a silent replacement usually indicates
    /// a bug upstream).
    pub fn subscribe(&self, label: EventLabel, listener: Arc<EventListener>, wake: WakeFn) {
        debug_assert!(
            registry::is_registered(label),
            "subscribing to an unregistered label is a programming error"
        );
        let mut subs = self.subscriptions.lock().expect("source subscriptions poisoned");
        if subs.contains_key(&label) {
            warn!(label = label.value(), "replacing existing subscription for event label");
        }
        subs.insert(label, Subscription { listener, wake });
    }

    /// Removes the subscription for `label`, if any.
    pub fn unsubscribe(&self, label: EventLabel) {
        self.subscriptions.lock().expect("source subscriptions poisoned").remove(&label);
    }

    /// Removes every subscription held by `listener`.
    pub fn unsubscribe_all(&self, listener: &Arc<EventListener>) {
        self.subscriptions
            .lock()
            .expect("source subscriptions poisoned")
            .retain(|_, sub| !Arc::ptr_eq(&sub.listener, listener));
    }

    /// Sets whether publications to `label` should wake the listener's loop
    /// (`false`, the default) or merely enqueue (`true`).
    pub fn deliver_silently(&self, label: EventLabel, silent: bool) {
        self.silent.lock().expect("source silent-flags poisoned").insert(label, silent);
    }

    /// Publishes `data` under `label`. If there is no subscriber, `data` is
    /// simply dropped. Otherwise the payload is enqueued on the subscribed
    /// listener, and — unless delivery is silent for this label, and unless
    /// the listener was already pending — the listener's loop is woken.
    pub fn publish(&self, label: EventLabel, data: EventData) {
        debug_assert!(
            registry::is_registered(label),
            "publishing to an unregistered label is a programming error"
        );

        let (listener, wake) = {
            let subs = self.subscriptions.lock().expect("source subscriptions poisoned");
            match subs.get(&label) {
                Some(sub) => (Arc::clone(&sub.listener), Arc::clone(&sub.wake)),
                None => return, // no subscriber: `data` is dropped here.
            }
        };

        let silent = *self.silent.lock().expect("source silent-flags poisoned").get(&label).unwrap_or(&false);

        let became_pending = listener.enqueue(label, data);
        if !silent && became_pending {
            wake();
        }
    }

    /// Forces a wakeup of whatever listener is subscribed to `label`,
    /// independent of whether anything is pending.
    pub fn wakeup_listener(&self, label: EventLabel) {
        if let Some(sub) = self.subscriptions.lock().expect("source subscriptions poisoned").get(&label) {
            (sub.wake)();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::{EventData, register};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn publish_without_subscriber_is_noop() {
        let source = EventSource::new();
        let label = register(Some("test.source.noop"));
        source.publish(label, EventData::Inline(1));
    }

    #[test]
    fn publish_wakes_once_per_pending_transition() {
        let source = EventSource::new();
        let label = register(Some("test.source.wake"));
        let listener = EventListener::new(None);
        listener.set_callback(label, Box::new(|_| {}), None);

        let wakeups = Arc::new(AtomicU32::new(0));
        let wakeups2 = Arc::clone(&wakeups);
        source.subscribe(label, Arc::clone(&listener), Arc::new(move || {
            wakeups2.fetch_add(1, Ordering::SeqCst);
        }));

        source.publish(label, EventData::Inline(1));
        source.publish(label, EventData::Inline(2));
        assert_eq!(wakeups.load(Ordering::SeqCst), 1);

        listener.run_pending();
        source.publish(label, EventData::Inline(3));
        assert_eq!(wakeups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn silent_delivery_does_not_wake() {
        let source = EventSource::new();
        let label = register(Some("test.source.silent"));
        let listener = EventListener::new(None);
        listener.set_callback(label, Box::new(|_| {}), None);

        let wakeups = Arc::new(AtomicU32::new(0));
        let wakeups2 = Arc::clone(&wakeups);
        source.subscribe(label, Arc::clone(&listener), Arc::new(move || {
            wakeups2.fetch_add(1, Ordering::SeqCst);
        }));
        source.deliver_silently(label, true);

        source.publish(label, EventData::Inline(1));
        assert_eq!(wakeups.load(Ordering::SeqCst), 0);
        assert!(listener.is_pending());
    }
}
