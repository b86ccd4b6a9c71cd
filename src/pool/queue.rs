//! Priority work queue shared by every worker thread.
//!
//! Grounded on `examples/original_source/tor/src/lib/evloop/workqueue.c`:
//! three priority levels (`WORKQUEUE_PRIORITY_FIRST` through `_LAST`, here
//! [`Priority::High`] through [`Priority::Low`]), and a starvation-avoidance
//! "chance" that occasionally skips a nonempty high-priority queue in favor
//! of a lower one so low-priority work is never starved outright.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rand::Rng;

use super::reply::ReplyQueue;

/// Work priority. Lower variants are tried first, subject to the
/// starvation-avoidance chance in [`WorkQueue::pop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

const PRIORITY_ORDER: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

/// 1-in-37 chance of deferring a nonempty queue to give a lower-priority one
/// a turn. Matches the teacher source's `CHANCE_PERMISSIVE`.
pub const CHANCE_PERMISSIVE: u32 = 37;

/// Never defer: always take the highest nonempty priority. Matches the
/// teacher source's `CHANCE_STRICT` (there, `INT32_MAX`).
pub const CHANCE_STRICT: u32 = u32::MAX;

fn index(p: Priority) -> usize {
    match p {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    }
}

/// A unit of work: a closure to run off the submitting thread, and the
/// reply queue (and payload constructor) used to hand the result back.
pub struct Job {
    pub priority: Priority,
    pub work: Box<dyn FnOnce() -> Box<dyn std::any::Any + Send> + Send>,
    pub reply_to: Arc<ReplyQueue>,
}

#[derive(Default)]
struct Queues {
    lanes: [VecDeque<Job>; 3],
}

impl Queues {
    fn new() -> Self {
        Self {
            lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.is_empty())
    }
}

/// The pool-wide queue of pending [`Job`]s, partitioned by [`Priority`].
pub struct WorkQueue {
    queues: Mutex<Queues>,
    wakers: Mutex<Vec<Arc<mio::Waker>>>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::new()),
            wakers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a worker's waker so [`push`](Self::push) can wake it when
    /// new work arrives.
    pub fn register_waker(&self, waker: Arc<mio::Waker>) {
        self.wakers.lock().expect("work queue wakers poisoned").push(waker);
    }

    /// Enqueues `job` and wakes every registered worker.
    pub fn push(&self, job: Job) {
        let idx = index(job.priority);
        self.queues.lock().expect("work queue poisoned").lanes[idx].push_back(job);
        for waker in self.wakers.lock().expect("work queue wakers poisoned").iter() {
            let _ = waker.wake();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().expect("work queue poisoned").is_empty()
    }

    /// Pops the next job to run. `chance` controls starvation avoidance: a
    /// 1-in-`chance` draw defers a nonempty lane (other than the last one)
    /// in favor of checking lower-priority lanes first. Pass
    /// [`CHANCE_STRICT`] to always take the highest nonempty lane, or
    /// [`CHANCE_PERMISSIVE`] to occasionally give lower lanes a turn.
    pub fn pop(&self, chance: u32) -> Option<Job> {
        let mut queues = self.queues.lock().expect("work queue poisoned");

        for (i, priority) in PRIORITY_ORDER.iter().enumerate() {
            let idx = index(*priority);
            if queues.lanes[idx].is_empty() {
                continue;
            }
            if i + 1 < PRIORITY_ORDER.len() && rand::rng().random_ratio(1, chance.max(1)) {
                continue;
            }
            return queues.lanes[idx].pop_front();
        }

        // every nonempty lane was deferred by the starvation draw: fall back
        // to strict priority order rather than returning nothing.
        for priority in PRIORITY_ORDER.iter() {
            let idx = index(*priority);
            if let Some(job) = queues.lanes[idx].pop_front() {
                return Some(job);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::reply::ReplyQueue;

    fn job(priority: Priority, reply_to: Arc<ReplyQueue>) -> Job {
        Job {
            priority,
            work: Box::new(|| Box::new(())),
            reply_to,
        }
    }

    #[test]
    fn strict_chance_always_prefers_higher_priority() {
        let queue = WorkQueue::new();
        let reply = ReplyQueue::new_unwired();
        queue.push(job(Priority::Low, Arc::clone(&reply)));
        queue.push(job(Priority::High, Arc::clone(&reply)));

        let popped = queue.pop(CHANCE_STRICT).unwrap();
        assert_eq!(popped.priority, Priority::High);
    }

    #[test]
    fn empty_queue_pops_none() {
        let queue = WorkQueue::new();
        assert!(queue.pop(CHANCE_STRICT).is_none());
    }

    #[test]
    fn fifo_within_a_priority() {
        let queue = WorkQueue::new();
        let reply = ReplyQueue::new_unwired();
        for _ in 0..3 {
            queue.push(job(Priority::Medium, Arc::clone(&reply)));
        }
        assert!(queue.pop(CHANCE_STRICT).is_some());
        assert!(queue.pop(CHANCE_STRICT).is_some());
        assert!(queue.pop(CHANCE_STRICT).is_some());
        assert!(queue.pop(CHANCE_STRICT).is_none());
    }
}
