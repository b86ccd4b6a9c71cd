//! Event listener: a pending queue plus a per-label callback table, bound to
//! one worker loop thread.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::EventData;
use super::registry::EventLabel;

/// Invoked once per pending event for the label it was registered under.
pub type ProcessFn = Box<dyn FnMut(EventData) + Send>;

/// Merges a newly-published payload into the tail-queued payload for the
/// same label, replacing both with the result.
pub type CoalesceFn = Box<dyn Fn(EventData, EventData) -> EventData + Send>;

struct Callback {
    process: ProcessFn,
    coalesce: Option<CoalesceFn>,
}

struct Pending {
    label: EventLabel,
    data: EventData,
}

/// Owns the pending-event queue and callback table for one worker loop.
///
/// At most one callback may be registered per label. When a label's
/// callback has a `coalesce` function and the queue's tail entry carries the
/// same label, a newly enqueued payload is merged into that tail entry
/// instead of appended.
pub struct EventListener {
    queue: Mutex<VecDeque<Pending>>,
    callbacks: Mutex<HashMap<EventLabel, Callback>>,
    pending: AtomicBool,
    max_iterations: Option<u32>,
}

impl EventListener {
    /// Creates a new, empty listener. `max_iterations` caps how many pending
    /// entries a single [`EventListener::run_pending`] call will process;
    /// `None` means unbounded (the original's "negative" sentinel).
    pub fn new(max_iterations: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            callbacks: Mutex::new(HashMap::new()),
            pending: AtomicBool::new(false),
            max_iterations,
        })
    }

    /// Registers (or replaces) the callbacks for `label`.
    pub fn set_callback(&self, label: EventLabel, process: ProcessFn, coalesce: Option<CoalesceFn>) {
        self.callbacks
            .lock()
            .expect("listener callback table poisoned")
            .insert(label, Callback { process, coalesce });
    }

    /// Called by an [`EventSource`](super::EventSource) publication. Returns
    /// `true` iff the listener transitioned from not-pending to pending,
    /// which tells the source it must wake the listener's loop (unless
    /// delivery is silent for this label).
    pub(crate) fn enqueue(&self, label: EventLabel, data: EventData) -> bool {
        let mut queue = self.queue.lock().expect("listener queue poisoned");

        let tail_matches = matches!(queue.back(), Some(p) if p.label == label);
        if tail_matches {
            let callbacks = self.callbacks.lock().expect("listener callback table poisoned");
            if let Some(coalesce) = callbacks.get(&label).and_then(|cb| cb.coalesce.as_ref()) {
                let tail = queue.back_mut().expect("checked above");
                let old = std::mem::replace(&mut tail.data, EventData::Inline(0));
                tail.data = coalesce(old, data);
                return false;
            }
        }

        queue.push_back(Pending { label, data });
        drop(queue);

        !self.pending.swap(true, Ordering::SeqCst)
    }

    /// Runs one processing pass: pops one entry at a time, releasing the
    /// queue lock before invoking its callback and reacquiring afterward,
    /// stopping on an empty queue or after `max_iterations`. If entries
    /// remain when the cap is hit, the caller is responsible for
    /// rescheduling the next pass (the listener stays marked pending).
    pub fn run_pending(&self) {
        let mut iterations: u32 = 0;
        loop {
            if let Some(max) = self.max_iterations {
                if iterations >= max {
                    return;
                }
            }

            let next = {
                let mut queue = self.queue.lock().expect("listener queue poisoned");
                queue.pop_front()
            };

            let Pending { label, data } = match next {
                Some(p) => p,
                None => {
                    self.pending.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let mut callbacks = self.callbacks.lock().expect("listener callback table poisoned");
            match callbacks.get_mut(&label) {
                Some(cb) => (cb.process)(data),
                None => warn!(label = label.value(), "no callback registered for event label; dropping"),
            }
            drop(callbacks);

            iterations += 1;
        }
    }

    /// Whether this listener currently has a scheduled-but-not-yet-run pass.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::register;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn dispatches_in_order() {
        let listener = EventListener::new(None);
        let label = register(Some("test.order"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        listener.set_callback(
            label,
            Box::new(move |data| {
                if let EventData::Inline(n) = data {
                    seen2.lock().unwrap().push(n);
                }
            }),
            None,
        );

        assert!(listener.enqueue(label, EventData::Inline(1)));
        assert!(!listener.enqueue(label, EventData::Inline(2)));
        listener.run_pending();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert!(!listener.is_pending());
    }

    #[test]
    fn coalesces_into_tail() {
        let listener = EventListener::new(None);
        let label = register(Some("test.coalesce"));
        let last_seen = Arc::new(AtomicI64::new(-1));
        let last_seen2 = Arc::clone(&last_seen);
        listener.set_callback(
            label,
            Box::new(move |data| {
                if let EventData::Inline(n) = data {
                    last_seen2.store(n, Ordering::SeqCst);
                }
            }),
            Some(Box::new(|_old, new| new)),
        );

        for i in 0..1000 {
            listener.enqueue(label, EventData::Inline(i));
        }
        listener.run_pending();

        assert_eq!(last_seen.load(Ordering::SeqCst), 999);
    }

    #[test]
    fn missing_callback_drops_silently() {
        let listener = EventListener::new(None);
        let label = register(Some("test.missing"));
        listener.enqueue(label, EventData::Inline(1));
        listener.run_pending();
    }
}
