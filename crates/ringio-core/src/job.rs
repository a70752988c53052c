//! Jobs handed from producers to a ring thread.
//!
//! A job owns its payload and its callback from the moment it is built
//! until the ring thread invokes the callback. Callbacks are one-shot:
//! `FnOnce`, boxed, invoked exactly once and then dropped.

use std::fmt;
use std::os::unix::io::RawFd;

use crate::code;
use crate::db::{DbReply, DbRequest};

/// File completion: byte count or negative errno, plus the buffer back.
pub type FileCallback = Box<dyn FnOnce(i32, Vec<u8>) + Send + 'static>;

/// Database completion.
pub type DbCallback = Box<dyn FnOnce(DbReply) + Send + 'static>;

/// What a file job resolves to when awaited or waited on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoOutcome {
    /// Bytes transferred, or negative errno.
    pub result: i32,
    /// For reads, truncated to the bytes read.
    pub buf: Vec<u8>,
}

impl IoOutcome {
    pub fn new(result: i32, buf: Vec<u8>) -> Self {
        Self { result, buf }
    }

    pub fn cancelled() -> Self {
        Self::new(code::CANCELED, Vec::new())
    }

    pub fn is_ok(&self) -> bool {
        self.result >= 0
    }
}

/// A file job.
///
/// `offset == -1` means "current file position" (the position advances).
pub enum FileJob {
    Read {
        fd: RawFd,
        buf: Vec<u8>,
        offset: i64,
        callback: FileCallback,
    },
    Write {
        fd: RawFd,
        buf: Vec<u8>,
        offset: i64,
        callback: FileCallback,
    },
    Close,
}

impl FileJob {
    pub fn is_close(&self) -> bool {
        matches!(self, FileJob::Close)
    }

    /// Resolve the job without running it.
    pub fn cancel(self, result: i32) {
        match self {
            FileJob::Read { buf, callback, .. } | FileJob::Write { buf, callback, .. } => {
                callback(result, buf)
            }
            FileJob::Close => {}
        }
    }
}

impl fmt::Debug for FileJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileJob::Read { fd, buf, offset, .. } => f
                .debug_struct("Read")
                .field("fd", fd)
                .field("len", &buf.len())
                .field("offset", offset)
                .finish(),
            FileJob::Write { fd, buf, offset, .. } => f
                .debug_struct("Write")
                .field("fd", fd)
                .field("len", &buf.len())
                .field("offset", offset)
                .finish(),
            FileJob::Close => f.write_str("Close"),
        }
    }
}

/// A database job against column family `F`.
pub enum DbJob<F> {
    Op {
        family: F,
        request: DbRequest,
        callback: DbCallback,
    },
    Close,
}

impl<F> DbJob<F> {
    pub fn is_close(&self) -> bool {
        matches!(self, DbJob::Close)
    }

    /// Resolve the job with `Cancelled` without running it.
    pub fn cancel(self) {
        if let DbJob::Op { callback, .. } = self {
            callback(DbReply::cancelled());
        }
    }
}

impl<F> fmt::Debug for DbJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbJob::Op { request, .. } => f.debug_tuple("Op").field(&request.kind()).finish(),
            DbJob::Close => f.write_str("Close"),
        }
    }
}
