//! `Ring` — the io_uring owned by one ring thread.
//!
//! Wraps the `io-uring` crate with exactly the primitives the worker loop
//! needs: queue a read, queue a write, arm a semaphore wait, and block for
//! the next completion. Nothing here is shared; a `Ring` is built on the
//! constructing thread (so setup errors surface there) and then moved to
//! the ring thread, which is its only user from then on.
//!
//! Submissions are only queued by the `submit_*` calls. They are handed to
//! the kernel by `wait_for_completion()`, which is the single blocking call
//! of the worker loop.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use io_uring::{opcode, types, IoUring};

use ringio_core::config::RingConfig;
use ringio_core::error::{Result, RingioError};

pub struct Ring {
    ring: IoUring,
}

impl Ring {
    pub fn new(config: &RingConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = IoUring::builder();
        if let Some(cq) = config.cq_entries {
            builder.setup_cqsize(cq);
        }
        if let Some(idle) = config.sqpoll_idle_ms {
            builder.setup_sqpoll(idle);
        }
        if let Some(fd) = config.attach_wq {
            builder.setup_attach_wq(fd);
        }
        let ring = builder
            .build(config.sq_entries)
            .map_err(|e| RingioError::RingSetup(e.raw_os_error().unwrap_or(-1)))?;

        Ok(Self { ring })
    }

    /// The ring fd, for `RingConfig::attach_wq` of sibling rings.
    pub fn raw_fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    pub fn sq_capacity(&mut self) -> usize {
        self.ring.submission().capacity()
    }

    /// Submission slots not yet taken by queued entries.
    pub fn free_slots(&mut self) -> usize {
        let sq = self.ring.submission();
        sq.capacity() - sq.len()
    }

    /// Queue a read of `len` bytes at `offset` (`u64::MAX` = file position).
    ///
    /// Returns false when the submission queue is full; nothing is retained.
    ///
    /// # Safety
    /// `buf..buf+len` must stay valid until the completion for `user_data`
    /// is returned by `wait_for_completion()`.
    pub unsafe fn submit_read(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        offset: u64,
        user_data: u64,
    ) -> bool {
        let sqe = opcode::Read::new(types::Fd(fd), buf, len)
            .offset(offset)
            .build()
            .user_data(user_data);
        self.push(&sqe)
    }

    /// Queue a write of `len` bytes at `offset` (`u64::MAX` = file position).
    ///
    /// # Safety
    /// Same contract as [`Ring::submit_read`].
    pub unsafe fn submit_write(
        &mut self,
        fd: RawFd,
        buf: *const u8,
        len: u32,
        offset: u64,
        user_data: u64,
    ) -> bool {
        let sqe = opcode::Write::new(types::Fd(fd), buf, len)
            .offset(offset)
            .build()
            .user_data(user_data);
        self.push(&sqe)
    }

    /// Arm an 8-byte read of a semaphore eventfd. The next `add()` on that
    /// semaphore produces a completion tagged `user_data`.
    ///
    /// # Safety
    /// `buf` must stay valid until that completion is returned.
    pub unsafe fn submit_semaphore_wait(&mut self, fd: RawFd, buf: *mut u64, user_data: u64) -> bool {
        self.submit_read(fd, buf as *mut u8, std::mem::size_of::<u64>() as u32, 0, user_data)
    }

    unsafe fn push(&mut self, sqe: &io_uring::squeue::Entry) -> bool {
        self.ring.submission().push(sqe).is_ok()
    }

    /// Hand queued submissions to the kernel and block until a completion
    /// is available. Returns `(result, user_data)` of one completion.
    ///
    /// A completion that has been popped is always returned; a failed flush
    /// of entries queued behind it is logged and retried on the next wait.
    pub fn wait_for_completion(&mut self) -> io::Result<(i32, u64)> {
        loop {
            let next = self.ring.completion().next();
            if let Some(cqe) = next {
                let done = (cqe.result(), cqe.user_data());
                if !self.ring.submission().is_empty() {
                    if let Err(e) = self.flush() {
                        tracing::warn!(error = %e, "flush failed, queued entries go out on the next wait");
                    }
                }
                return Ok(done);
            }
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if retryable(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Hand queued submissions to the kernel without waiting.
    pub fn flush(&mut self) -> io::Result<usize> {
        loop {
            match self.ring.submit() {
                Ok(n) => return Ok(n),
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                // CQ backpressure: the entries stay queued for the next wait.
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => return Ok(0),
                Err(e) => return Err(e),
            }
        }
    }
}

fn retryable(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EINTR) | Some(libc::EBUSY))
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("fd", &self.raw_fd())
            .field("sq_entries", &self.ring.params().sq_entries())
            .field("cq_entries", &self.ring.params().cq_entries())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semaphore::{Semaphore, SemaphoreMode};
    use std::io::{Read, Seek, SeekFrom};
    use std::os::unix::io::AsRawFd;

    fn small() -> RingConfig {
        RingConfig {
            sq_entries: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let cfg = RingConfig {
            sq_entries: 6,
            ..Default::default()
        };
        assert!(matches!(Ring::new(&cfg), Err(RingioError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_attach_fails() {
        let cfg = RingConfig {
            attach_wq: Some(-1),
            ..small()
        };
        assert!(matches!(Ring::new(&cfg), Err(RingioError::RingSetup(_))));
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut ring = Ring::new(&small()).unwrap();
        let mut file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();

        let data = b"hello ring".to_vec();
        assert!(unsafe { ring.submit_write(fd, data.as_ptr(), data.len() as u32, 4, 1) });
        assert_eq!(ring.wait_for_completion().unwrap(), (data.len() as i32, 1));

        let mut back = vec![0u8; data.len()];
        assert!(unsafe { ring.submit_read(fd, back.as_mut_ptr(), back.len() as u32, 4, 2) });
        assert_eq!(ring.wait_for_completion().unwrap(), (data.len() as i32, 2));
        assert_eq!(back, data);

        let mut on_disk = Vec::new();
        file.seek(SeekFrom::Start(4)).unwrap();
        file.read_to_end(&mut on_disk).unwrap();
        assert_eq!(on_disk, data);
    }

    #[test]
    fn test_semaphore_wait_fires_on_add() {
        let mut ring = Ring::new(&small()).unwrap();
        let sem = Semaphore::new(0, SemaphoreMode::NonBlocking).unwrap();
        let mut buf = Box::new(0u64);
        assert!(unsafe { ring.submit_semaphore_wait(sem.fd(), &mut *buf, u64::MAX) });
        ring.flush().unwrap();

        let s = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            assert!(sem.add());
            sem
        });
        assert_eq!(ring.wait_for_completion().unwrap(), (8, u64::MAX));
        assert_eq!(*buf, 1);
        let sem = s.join().unwrap();
        assert_eq!(sem.try_consume(1), 0);
    }

    #[test]
    fn test_submission_queue_full() {
        let mut ring = Ring::new(&small()).unwrap();
        let file = tempfile::tempfile().unwrap();
        let data = [0u8; 1];
        let cap = ring.sq_capacity();
        for i in 0..cap {
            assert!(unsafe { ring.submit_write(file.as_raw_fd(), data.as_ptr(), 1, i as u64, i as u64) });
        }
        assert_eq!(ring.free_slots(), 0);
        assert!(!unsafe { ring.submit_write(file.as_raw_fd(), data.as_ptr(), 1, 0, 99) });

        for _ in 0..cap {
            let (res, _) = ring.wait_for_completion().unwrap();
            assert_eq!(res, 1);
        }
        assert_eq!(ring.free_slots(), cap);
    }

    #[test]
    fn test_completion_returned_with_entries_still_queued() {
        let mut ring = Ring::new(&small()).unwrap();
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let first = b"one".to_vec();
        let second = b"two".to_vec();

        assert!(unsafe { ring.submit_write(fd, first.as_ptr(), 3, 0, 1) });
        ring.flush().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        // The first completion is already posted; this entry is queued behind it.
        assert!(unsafe { ring.submit_write(fd, second.as_ptr(), 3, 3, 2) });
        assert_eq!(ring.wait_for_completion().unwrap(), (3, 1));
        assert_eq!(ring.free_slots(), ring.sq_capacity());
        assert_eq!(ring.wait_for_completion().unwrap(), (3, 2));

        let mut back = [0u8; 6];
        let n = unsafe { libc::pread(fd, back.as_mut_ptr() as *mut libc::c_void, 6, 0) };
        assert_eq!(n, 6);
        assert_eq!(&back, b"onetwo");
    }

    #[test]
    fn test_io_error_is_negative_result() {
        let mut ring = Ring::new(&small()).unwrap();
        let mut buf = [0u8; 4];
        // fd 1_000_000 is never open.
        assert!(unsafe { ring.submit_read(1_000_000, buf.as_mut_ptr(), 4, 0, 5) });
        assert_eq!(ring.wait_for_completion().unwrap(), (-libc::EBADF, 5));
    }
}
