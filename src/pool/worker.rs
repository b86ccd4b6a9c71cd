//! A single worker thread: an event loop that services the pool-wide work
//! queue, woken by the `mio::Waker` the queue wakes on every push.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::{Events, Poll, Token, Waker};
use tracing::{debug, trace};

use super::queue::{CHANCE_PERMISSIVE, CHANCE_STRICT, WorkQueue};

const WAKE_TOKEN: Token = Token(0);

/// How long a worker blocks in `poll` before re-checking the shutdown flag
/// even with nothing else to wake it.
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// One pool worker. Half the pool (even indices) is strict — it always
/// drains the highest nonempty priority lane first — and the other half
/// (odd indices) is permissive, occasionally giving lower-priority work a
/// turn so it is never starved outright.
pub struct WorkerThread {
    index: usize,
    chance: u32,
    queue: Arc<WorkQueue>,
    poll: Mutex<Poll>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerThread {
    pub fn new(index: usize, queue: Arc<WorkQueue>) -> io::Result<Arc<Self>> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        queue.register_waker(Arc::clone(&waker));
        let chance = if index % 2 == 0 { CHANCE_STRICT } else { CHANCE_PERMISSIVE };
        Ok(Arc::new(Self {
            index,
            chance,
            queue,
            poll: Mutex::new(poll),
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Handle used to request this worker stop after its current pass.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Runs the worker loop until `shutdown_flag` is set. Intended to be
    /// called on its own OS thread.
    pub fn run(&self) {
        let mut events = Events::with_capacity(128);
        debug!(worker = self.index, chance = self.chance, "worker loop starting");
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!(worker = self.index, "worker loop exiting");
                return;
            }

            {
                let mut poll = self.poll.lock().expect("worker poll poisoned");
                if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                    if err.kind() != io::ErrorKind::Interrupted {
                        tracing::error!(worker = self.index, %err, "worker poll failed");
                    }
                }
            }

            let mut drained = 0u32;
            while let Some(job) = self.queue.pop(self.chance) {
                let reply_to = Arc::clone(&job.reply_to);
                let result = (job.work)();
                reply_to.post(result);
                drained += 1;
            }
            trace!(worker = self.index, drained, "worker pass complete");
        }
    }
}
