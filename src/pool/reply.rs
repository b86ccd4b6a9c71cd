//! Reply queue: carries finished job results back to the thread that
//! submitted them, waking it via an `mio::Waker` rather than the original's
//! self-pipe.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A one-way mailbox owned by a submitting thread. Worker threads post
/// results here; the owner drains it from its own event loop after being
/// woken.
pub struct ReplyQueue {
    pending: Mutex<VecDeque<Box<dyn Any + Send>>>,
    waker: Mutex<Option<Arc<mio::Waker>>>,
}

impl Default for ReplyQueue {
    fn default() -> Self {
        Self::new_unwired()
    }
}

impl ReplyQueue {
    /// Creates a reply queue with no waker attached yet. Posts are stored but
    /// do not wake anything until [`wire`](Self::wire) is called.
    pub fn new_unwired() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
            waker: Mutex::new(None),
        })
    }

    /// Creates a reply queue that wakes `waker` on every post.
    pub fn new(waker: Arc<mio::Waker>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
            waker: Mutex::new(Some(waker)),
        })
    }

    /// Attaches (or replaces) the waker used to signal the owning thread.
    pub fn wire(&self, waker: Arc<mio::Waker>) {
        *self.waker.lock().expect("reply queue waker poisoned") = Some(waker);
    }

    /// Posts a result and wakes the owner, if wired.
    pub fn post(&self, result: Box<dyn Any + Send>) {
        self.pending.lock().expect("reply queue poisoned").push_back(result);
        if let Some(waker) = self.waker.lock().expect("reply queue waker poisoned").as_ref() {
            let _ = waker.wake();
        }
    }

    /// Drains every pending result, in post order.
    pub fn drain(&self) -> Vec<Box<dyn Any + Send>> {
        self.pending.lock().expect("reply queue poisoned").drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().expect("reply queue poisoned").is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drains_in_post_order() {
        let queue = ReplyQueue::new_unwired();
        queue.post(Box::new(1i32));
        queue.post(Box::new(2i32));
        let results = queue.drain();
        assert_eq!(results.len(), 2);
        assert_eq!(*results[0].downcast_ref::<i32>().unwrap(), 1);
        assert_eq!(*results[1].downcast_ref::<i32>().unwrap(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn post_wakes_wired_waker() {
        let poll = mio::Poll::new().unwrap();
        let waker = Arc::new(mio::Waker::new(poll.registry(), mio::Token(0)).unwrap());
        let queue = ReplyQueue::new(Arc::clone(&waker));
        queue.post(Box::new(42i32));
        // A real assertion would observe `poll.poll(...)` waking; here we
        // only check that wiring and posting don't panic or drop results.
        assert_eq!(queue.drain().len(), 1);
    }
}
