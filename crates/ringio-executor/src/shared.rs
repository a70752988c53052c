//! State shared between a manager and its ring thread.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ringio_core::code;
use ringio_core::error::Result;
use ringio_core::job::{DbJob, FileJob};
use ringio_module::{BoundedEventQueue, Semaphore, SemaphoreMode};

/// A job as seen by the worker loop.
pub trait QueuedJob: Send + 'static {
    /// The shutdown sentinel.
    fn close() -> Self;
    fn is_close(&self) -> bool;
    /// Resolve the job with its cancellation result without running it.
    fn abort(self);
}

impl QueuedJob for FileJob {
    fn close() -> Self {
        FileJob::Close
    }

    fn is_close(&self) -> bool {
        FileJob::is_close(self)
    }

    fn abort(self) {
        self.cancel(code::CANCELED);
    }
}

impl<F: Send + 'static> QueuedJob for DbJob<F> {
    fn close() -> Self {
        DbJob::Close
    }

    fn is_close(&self) -> bool {
        DbJob::is_close(self)
    }

    fn abort(self) {
        self.cancel();
    }
}

/// Queue, wake-up semaphore and counters of one ring thread.
///
/// Producers `emplace` then `sem.add()`; only the ring thread pops.
pub struct WorkerShared<J> {
    pub queue: BoundedEventQueue<J>,
    pub sem: Semaphore,
    in_flight: AtomicUsize,
    completed: AtomicU64,
}

impl<J: QueuedJob> WorkerShared<J> {
    pub fn new(queue_capacity: usize) -> Result<Self> {
        Ok(Self {
            queue: BoundedEventQueue::new(queue_capacity),
            sem: Semaphore::new(0, SemaphoreMode::NonBlocking)?,
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        })
    }

    /// Enqueue and wake the ring thread. Hands the job back when the queue
    /// is full.
    pub fn push(&self, job: J) -> std::result::Result<(), J> {
        self.queue.emplace(job)?;
        if !self.sem.add() {
            tracing::warn!("semaphore add failed; job waits for the next wake-up");
        }
        Ok(())
    }

    /// Operations submitted to the ring and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Callbacks delivered by the ring thread, cancellations included.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn delivered(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl<J> std::fmt::Debug for WorkerShared<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerShared")
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish()
    }
}
