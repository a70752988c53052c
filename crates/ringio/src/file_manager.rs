//! `FileManager` — positional file reads and writes on a ring thread.
//!
//! ```ignore
//! let files = FileManager::new(ManagerConfig::new().name("wal"))?;
//!
//! // Callback form: returns immediately.
//! files.write(fd, b"qwerty".to_vec(), -1, |res, _buf| assert_eq!(res, 6));
//!
//! // From a tokio task.
//! let out = files.read_async(fd, vec![0; 6], 0).await;
//!
//! // From any thread, including inside a runtime.
//! let out = files.read_blocking(fd, vec![0; 6], 0);
//! ```
//!
//! `offset == -1` reads or writes at the file's current position, which
//! then advances. Results are byte counts or negative errnos.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};

use ringio_core::code;
use ringio_core::config::ManagerConfig;
use ringio_core::error::Result;
use ringio_core::job::{FileCallback, FileJob, IoOutcome};
use ringio_executor::FileHandler;

use crate::handle::RingWorker;
use crate::promise;

pub struct FileManager {
    worker: RingWorker<FileJob>,
}

impl FileManager {
    /// Start a ring thread configured by `config`.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Ok(Self {
            worker: RingWorker::start("file", &config, FileHandler)?,
        })
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Ring fd, used to attach sibling rings to the same kernel workers.
    pub fn ring_fd(&self) -> RawFd {
        self.worker.ring_fd()
    }

    /// Jobs accepted into the queue.
    pub fn submitted(&self) -> u64 {
        self.worker.submitted()
    }

    /// Jobs submitted to the kernel and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.worker.in_flight()
    }

    /// Callbacks delivered by the ring thread.
    pub fn completed(&self) -> u64 {
        self.worker.completed()
    }

    /// Read up to `buf.len()` bytes at `offset`. The callback receives the
    /// byte count (or negative errno) and `buf` truncated to what was read.
    pub fn read<F>(&self, fd: RawFd, buf: Vec<u8>, offset: i64, callback: F)
    where
        F: FnOnce(i32, Vec<u8>) + Send + 'static,
    {
        self.enqueue(FileJob::Read { fd, buf, offset, callback: Box::new(callback) });
    }

    /// Write `buf` at `offset`. The callback receives the byte count (or
    /// negative errno) and `buf` back.
    pub fn write<F>(&self, fd: RawFd, buf: Vec<u8>, offset: i64, callback: F)
    where
        F: FnOnce(i32, Vec<u8>) + Send + 'static,
    {
        self.enqueue(FileJob::Write { fd, buf, offset, callback: Box::new(callback) });
    }

    pub async fn read_async(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        let (callback, rx) = outcome_channel();
        self.enqueue(FileJob::Read { fd, buf, offset, callback });
        promise::resolve(rx, IoOutcome::cancelled).await
    }

    pub async fn write_async(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        let (callback, rx) = outcome_channel();
        self.enqueue(FileJob::Write { fd, buf, offset, callback });
        promise::resolve(rx, IoOutcome::cancelled).await
    }

    pub fn read_blocking(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        let (callback, rx) = outcome_channel();
        self.enqueue(FileJob::Read { fd, buf, offset, callback });
        promise::wait(rx, IoOutcome::cancelled)
    }

    pub fn write_blocking(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        let (callback, rx) = outcome_channel();
        self.enqueue(FileJob::Write { fd, buf, offset, callback });
        promise::wait(rx, IoOutcome::cancelled)
    }

    fn enqueue(&self, job: FileJob) {
        let fd = match &job {
            FileJob::Read { fd, .. } | FileJob::Write { fd, .. } => *fd,
            FileJob::Close => return,
        };
        if !is_open_fd(fd) {
            job.cancel(code::BAD_HANDLE);
            return;
        }
        if let Err(job) = self.worker.push(job) {
            tracing::warn!(subsystem = %self.name(), fd, "event queue full, cancelling");
            job.cancel(code::CANCELED);
        }
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("name", &self.name())
            .field("submitted", &self.submitted())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn is_open_fd(fd: RawFd) -> bool {
    fd >= 0 && fcntl(fd, FcntlArg::F_GETFD) != Err(Errno::EBADF)
}

fn outcome_channel() -> (FileCallback, tokio::sync::oneshot::Receiver<IoOutcome>) {
    let (tx, rx) = promise::channel();
    let callback: FileCallback = Box::new(move |result, buf| {
        let _ = tx.send(IoOutcome::new(result, buf));
    });
    (callback, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::sync::mpsc;

    fn manager() -> FileManager {
        FileManager::new(ManagerConfig::new().name("fm-unit").sq_entries(8)).unwrap()
    }

    #[test]
    fn test_invalid_fd_is_synchronous() {
        let fm = manager();
        let (tx, rx) = mpsc::channel();
        fm.read(-1, vec![0; 4], 0, move |res, _| tx.send(res).unwrap());
        // Delivered before `read` returned.
        assert_eq!(rx.try_recv().unwrap(), code::BAD_HANDLE);
        assert_eq!(fm.submitted(), 0);
    }

    #[test]
    fn test_closed_fd_is_bad_handle() {
        let fm = manager();
        // Park the descriptor at the top of the table, then close it; fds
        // are handed out lowest-first, so nothing else reuses the number.
        let mut lim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
        assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) }, 0);
        let fd = (lim.rlim_cur.min(65_536) - 1) as RawFd;
        let file = tempfile::tempfile().unwrap();
        assert_eq!(unsafe { libc::dup2(file.as_raw_fd(), fd) }, fd);
        drop(file);
        assert_eq!(unsafe { libc::close(fd) }, 0);

        let out = fm.write_blocking(fd, b"x".to_vec(), 0);
        assert_eq!(out.result, code::BAD_HANDLE);
        assert_eq!(out.buf, b"x");
        assert_eq!(fm.submitted(), 0);
    }

    #[test]
    fn test_blocking_round_trip_and_stats() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let fm = manager();
        assert_eq!(fm.write_blocking(fd, b"abc".to_vec(), 0).result, 3);
        let out = fm.read_blocking(fd, vec![0; 16], 0);
        assert_eq!(out, IoOutcome::new(3, b"abc".to_vec()));
        assert_eq!(fm.submitted(), 2);
        // Counters move after the callback has run.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while fm.completed() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(fm.completed(), 2);
        assert_eq!(fm.in_flight(), 0);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let err = FileManager::new(ManagerConfig::new().sq_entries(3)).unwrap_err();
        assert!(matches!(err, ringio_core::RingioError::InvalidConfig(_)));
    }
}
