//! Ownership of one ring thread: start, enqueue, ordered shutdown.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ringio_core::config::ManagerConfig;
use ringio_core::error::Result;
use ringio_executor::{spawn_worker, Handler, QueuedJob, WorkerShared};
use ringio_module::Ring;

pub(crate) struct RingWorker<J: QueuedJob> {
    name: String,
    shared: Arc<WorkerShared<J>>,
    thread: Option<JoinHandle<()>>,
    ring_fd: RawFd,
    submitted: AtomicU64,
    close_retry_attempts: u32,
    close_retry_interval: Duration,
    shutdown_timeout: Duration,
}

impl<J: QueuedJob> RingWorker<J> {
    /// Build the ring here, so setup errors reach the caller, then move it
    /// to a new thread named `ringio-<kind>-<name>`.
    pub fn start<H>(kind: &str, config: &ManagerConfig, handler: H) -> Result<Self>
    where
        H: Handler<Job = J>,
    {
        config.validate()?;
        let ring = Ring::new(&config.ring)?;
        let ring_fd = ring.raw_fd();
        let shared = Arc::new(WorkerShared::new(config.queue_capacity)?);

        let thread = spawn_worker(
            format!("ringio-{}-{}", kind, config.name),
            &config.name,
            ring,
            shared.clone(),
            handler,
        )?;
        tracing::info!(
            subsystem = %config.name,
            kind,
            ring_fd,
            sq_entries = config.ring.sq_entries,
            queue_capacity = config.queue_capacity,
            "ring worker started"
        );

        Ok(Self {
            name: config.name.clone(),
            shared,
            thread: Some(thread),
            ring_fd,
            submitted: AtomicU64::new(0),
            close_retry_attempts: config.close_retry_attempts,
            close_retry_interval: config.close_retry_interval,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Enqueue and wake the ring thread; the job comes back when the
    /// queue is full.
    pub fn push(&self, job: J) -> std::result::Result<(), J> {
        self.shared.push(job)?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ring_fd(&self) -> RawFd {
        self.ring_fd
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    pub fn completed(&self) -> u64 {
        self.shared.completed()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Queue Close behind everything already accepted, then wait for the
    /// ring thread to drain its in-flight work and exit.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let mut close = J::close();
        let mut queued = false;
        for _ in 0..=self.close_retry_attempts {
            match self.shared.queue.emplace(close) {
                Ok(()) => {
                    queued = true;
                    break;
                }
                Err(back) => {
                    close = back;
                    thread::sleep(self.close_retry_interval);
                }
            }
        }
        if !queued {
            tracing::error!(
                subsystem = %self.name,
                attempts = self.close_retry_attempts,
                "could not queue close; detaching ring thread"
            );
            return;
        }
        self.shared.sem.add();

        let deadline = Instant::now() + self.shutdown_timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                tracing::error!(
                    subsystem = %self.name,
                    in_flight = self.shared.in_flight(),
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "ring thread did not stop in time; detaching"
                );
                return;
            }
            thread::sleep(self.close_retry_interval);
        }
        if thread.join().is_err() {
            tracing::error!(subsystem = %self.name, "ring thread panicked");
        }
        tracing::info!(
            subsystem = %self.name,
            submitted = self.submitted(),
            completed = self.completed(),
            "ring worker stopped"
        );
    }
}

impl<J: QueuedJob> Drop for RingWorker<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
