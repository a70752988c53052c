//! `Semaphore` — counting wakeup primitive over an eventfd.
//!
//! The eventfd is opened in semaphore mode: every successful read takes
//! exactly one unit, so the count tracks queued jobs one-for-one.
//!
//! The fd is left blocking: io_uring fails a read of an `O_NONBLOCK` fd
//! with `-EAGAIN` instead of waiting for it. Non-blocking takes check
//! readiness with a zero-timeout `poll(2)` first, which is exact as long as
//! there is a single consumer.
//!
//! Producers call `add()`. The ring thread arms a read of `fd()` on its
//! ring, so an `add()` turns into a completion it is already waiting on.
//! The count is a wakeup signal, never a data channel.

use std::os::fd::{AsFd, AsRawFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};

use ringio_core::error::{Result, RingioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreMode {
    /// `consume()` waits until a unit is available.
    Blocking,
    /// `consume()` makes one attempt.
    NonBlocking,
}

pub struct Semaphore {
    fd: EventFd,
    mode: SemaphoreMode,
}

impl Semaphore {
    pub fn new(initial: u32, mode: SemaphoreMode) -> Result<Self> {
        let flags = EfdFlags::EFD_SEMAPHORE | EfdFlags::EFD_CLOEXEC;
        let fd = EventFd::from_value_and_flags(initial, flags)
            .map_err(|e| RingioError::EventFd(e as i32))?;
        Ok(Self { fd, mode })
    }

    pub fn mode(&self) -> SemaphoreMode {
        self.mode
    }

    /// Add one unit. False only on a descriptor error.
    pub fn add(&self) -> bool {
        match self.fd.write(1) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(fd = self.raw_fd(), error = %e, "semaphore add failed");
                false
            }
        }
    }

    /// Take one unit. See `SemaphoreMode` for waiting behaviour.
    pub fn consume(&self) -> bool {
        match self.mode {
            SemaphoreMode::Blocking => loop {
                match self.fd.read() {
                    Ok(_) => return true,
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        tracing::debug!(fd = self.raw_fd(), error = %e, "semaphore consume failed");
                        return false;
                    }
                }
            },
            SemaphoreMode::NonBlocking => self.try_take(),
        }
    }

    /// Take up to `max_n` units without waiting. Returns how many were taken.
    pub fn try_consume(&self, max_n: usize) -> usize {
        let mut taken = 0;
        while taken < max_n && self.try_take() {
            taken += 1;
        }
        taken
    }

    /// Raw descriptor, for arming a read on the ring.
    pub fn fd(&self) -> RawFd {
        self.raw_fd()
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn try_take(&self) -> bool {
        if !self.readable() {
            return false;
        }
        loop {
            match self.fd.read() {
                Ok(_) => return true,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::debug!(fd = self.raw_fd(), error = %e, "semaphore read failed");
                    return false;
                }
            }
        }
    }

    fn readable(&self) -> bool {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(n) => {
                    return n > 0
                        && fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::debug!(fd = self.raw_fd(), error = %e, "semaphore poll failed");
                    return false;
                }
            }
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("fd", &self.raw_fd())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_add_then_consume_n() {
        for mode in [SemaphoreMode::Blocking, SemaphoreMode::NonBlocking] {
            let sem = Semaphore::new(0, mode).unwrap();
            for _ in 0..10 {
                assert!(sem.add());
            }
            for _ in 0..10 {
                assert!(sem.consume());
            }
            assert_eq!(sem.try_consume(1), 0);
        }
    }

    #[test]
    fn test_nonblocking_consume_on_empty() {
        let sem = Semaphore::new(0, SemaphoreMode::NonBlocking).unwrap();
        assert!(!sem.consume());
    }

    #[test]
    fn test_initial_count() {
        let sem = Semaphore::new(3, SemaphoreMode::NonBlocking).unwrap();
        assert_eq!(sem.try_consume(10), 3);
    }

    #[test]
    fn test_try_consume_min() {
        for (count, k) in [(5usize, 3usize), (2, 7), (0, 4), (4, 4)] {
            let sem = Semaphore::new(0, SemaphoreMode::NonBlocking).unwrap();
            for _ in 0..count {
                sem.add();
            }
            let taken = sem.try_consume(k);
            assert_eq!(taken, count.min(k));
            assert_eq!(sem.try_consume(usize::MAX), count - taken);
        }
    }

    #[test]
    fn test_blocking_consume_wakes_on_add() {
        let sem = Arc::new(Semaphore::new(0, SemaphoreMode::Blocking).unwrap());
        let s = sem.clone();
        let waiter = std::thread::spawn(move || s.consume());
        std::thread::sleep(Duration::from_millis(20));
        assert!(sem.add());
        assert!(waiter.join().unwrap());
        assert_eq!(sem.try_consume(1), 0);
    }

    #[test]
    fn test_concurrent_adds() {
        let sem = Arc::new(Semaphore::new(0, SemaphoreMode::NonBlocking).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = sem.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(s.add());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sem.try_consume(1000), 400);
    }
}
