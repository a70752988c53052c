//! The worker loop and its thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ringio_core::error::{Result, RingioError};
use ringio_module::Ring;

use crate::completion::SEMAPHORE_TOKEN;
use crate::shared::{QueuedJob, WorkerShared};

/// What the loop does with jobs and with the completions they produce.
pub trait Handler: Send + 'static {
    type Job: QueuedJob;

    /// Start `job`. True when it is now in flight on the ring; false when
    /// it was resolved on the spot (its callback has run).
    ///
    /// Never called with the Close sentinel.
    fn start(&mut self, ring: &mut Ring, job: Self::Job) -> bool;

    /// Handle the completion of a record this handler put in flight. True
    /// when the record was resubmitted and is still in flight.
    ///
    /// # Safety
    /// `user_data` must be the `user_data` of an SQE submitted by this
    /// handler whose completion has not been handled yet.
    unsafe fn complete(&mut self, ring: &mut Ring, user_data: u64, result: i32) -> bool;
}

/// Run `f`, logging instead of unwinding when it panics.
pub(crate) fn guarded(what: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(what, "callback panicked");
    }
}

/// Spawn the ring thread for `shared`, consuming `ring`.
///
/// The thread runs inside a `ring_worker` span tagged with `subsystem`.
pub fn spawn_worker<H: Handler>(
    thread_name: String,
    subsystem: &str,
    ring: Ring,
    shared: Arc<WorkerShared<H::Job>>,
    handler: H,
) -> Result<JoinHandle<()>> {
    let subsystem = subsystem.to_string();
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let span = tracing::info_span!("ring_worker", subsystem = %subsystem);
            let _enter = span.enter();
            run(ring, shared, handler);
        })
        .map_err(|e| RingioError::Spawn(e.to_string()))
}

/// The loop. Returns once a Close job has been seen and every in-flight
/// operation has completed; jobs still queued at that point are cancelled.
pub fn run<H: Handler>(mut ring: Ring, shared: Arc<WorkerShared<H::Job>>, mut handler: H) {
    let sem_fd = shared.sem.fd();
    // The kernel writes the semaphore value here while the wait is armed.
    let mut sem_buf = Box::new(0u64);
    let mut stopping = false;

    tracing::debug!(ring_fd = ring.raw_fd(), sem_fd, "ring thread started");
    let mut armed = arm(&mut ring, sem_fd, &mut sem_buf);

    while !(stopping && shared.in_flight() == 0) {
        if !armed && !stopping {
            armed = arm(&mut ring, sem_fd, &mut sem_buf);
            if !armed {
                tracing::error!("cannot arm semaphore wait");
                thread::sleep(Duration::from_millis(1));
                continue;
            }
        }

        let (result, user_data) = match ring.wait_for_completion() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "wait for completion failed");
                thread::sleep(Duration::from_millis(1));
                continue;
            }
        };

        if user_data == SEMAPHORE_TOKEN {
            armed = false;
            if result < 0 {
                tracing::warn!(errno = -result, "semaphore read failed");
            } else {
                stopping = drain(&mut ring, &shared, &mut handler);
            }
        } else {
            // Safety: every non-token user_data was produced by `handler`.
            let resubmitted = unsafe { handler.complete(&mut ring, user_data, result) };
            if !resubmitted {
                shared.end();
                shared.delivered();
            }
        }
    }

    let mut cancelled = 0usize;
    while let Some(job) = shared.queue.pop() {
        if job.is_close() {
            continue;
        }
        guarded("cancel", || job.abort());
        shared.delivered();
        cancelled += 1;
    }
    tracing::info!(cancelled, completed = shared.completed(), "ring thread exiting");
}

/// Start up to `1 + try_consume(free_slots - 2)` queued jobs: one unit was
/// taken by the semaphore read itself, and one slot stays free for the
/// re-arm. Returns true when the Close sentinel was popped.
fn drain<H: Handler>(ring: &mut Ring, shared: &WorkerShared<H::Job>, handler: &mut H) -> bool {
    let budget = 1 + shared.sem.try_consume(ring.free_slots().saturating_sub(2));
    for _ in 0..budget {
        // Fewer jobs than units is harmless; each later push wakes us again.
        let Some(job) = shared.queue.pop() else {
            break;
        };
        if job.is_close() {
            tracing::debug!(in_flight = shared.in_flight(), "close received");
            return true;
        }
        if handler.start(ring, job) {
            shared.begin();
        } else {
            shared.delivered();
        }
    }
    false
}

fn arm(ring: &mut Ring, sem_fd: RawFd, buf: &mut u64) -> bool {
    let buf: *mut u64 = buf;
    // Safety: `buf` points into a box that outlives the loop, and no wait
    // is armed when the loop exits.
    unsafe {
        if ring.submit_semaphore_wait(sem_fd, buf, SEMAPHORE_TOKEN) {
            return true;
        }
        // SQ full: hand what is queued to the kernel and retry once.
        ring.flush().is_ok() && ring.submit_semaphore_wait(sem_fd, buf, SEMAPHORE_TOKEN)
    }
}
