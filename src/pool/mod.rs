//! Worker pool: N event-loop-owning OS threads draining a shared priority
//! work queue, each reporting results back through a caller-owned reply
//! queue.
//!
//! Grounded on `examples/original_source/tor/src/lib/evloop/workqueue.c`.

mod queue;
mod reply;
mod worker;

pub use queue::{CHANCE_PERMISSIVE, CHANCE_STRICT, Job, Priority, WorkQueue};
pub use reply::ReplyQueue;
pub use worker::WorkerThread;

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

/// Upper bound on pool size, matching the teacher source's `MAX_THREADS`.
pub const MAX_WORKERS: usize = 1024;

/// A running pool of worker threads plus the handles needed to stop them.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    workers: Vec<Arc<WorkerThread>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `num_threads` worker threads, each with its own event loop.
    pub fn start(num_threads: usize) -> io::Result<Self> {
        assert!(num_threads > 0 && num_threads <= MAX_WORKERS, "worker count out of range");

        let queue = Arc::new(WorkQueue::new());
        let mut workers = Vec::with_capacity(num_threads);
        let mut handles = Vec::with_capacity(num_threads);

        for i in 0..num_threads {
            let worker = WorkerThread::new(i, Arc::clone(&queue))?;
            let for_thread = Arc::clone(&worker);
            let handle = thread::Builder::new()
                .name(format!("relaylink-worker-{i}"))
                .spawn(move || for_thread.run())?;
            workers.push(worker);
            handles.push(handle);
        }

        Ok(Self { queue, workers, handles })
    }

    /// Submits a job to the shared queue; any idle worker may pick it up.
    pub fn submit(&self, job: Job) {
        self.queue.push(job);
    }

    /// A handle to the shared queue, for callers that build [`Job`]s and
    /// want to submit without going through the pool object.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker to stop after its current pass and joins all
    /// threads. Blocks until every worker has exited.
    pub fn shutdown(mut self) {
        for worker in &self.workers {
            worker.shutdown_flag().store(true, Ordering::SeqCst);
            let _ = worker.waker().wake();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    #[test]
    fn pool_drains_submitted_jobs() {
        let pool = WorkerPool::start(2).expect("pool starts");
        let reply = ReplyQueue::new_unwired();
        let done = StdArc::new(AtomicU32::new(0));
        let done2 = StdArc::clone(&done);

        pool.submit(Job {
            priority: Priority::High,
            work: Box::new(move || {
                done2.fetch_add(1, AtomicOrdering::SeqCst);
                Box::new(())
            }),
            reply_to: StdArc::clone(&reply),
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while done.load(AtomicOrdering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(done.load(AtomicOrdering::SeqCst), 1);
        pool.shutdown();
    }
}
