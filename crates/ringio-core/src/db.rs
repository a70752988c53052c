//! Database engine seam.
//!
//! The engine is an opaque collaborator. For every request it hands the
//! ring thread a `DbOperation`: a resumable state machine that either
//! finishes on the spot or asks for one ring transfer at a time.
//!
//! ```text
//! ring thread                         DbOperation
//! ───────────                         ───────────
//! op = engine.start(family, req)
//! op.resume(&mut slot, None)  ─────▶  slot.read(fd, buf, len, off)
//!                             ◀─────  Step::Pending
//! submit slot request to ring
//!   ... CQE(result) ...
//! op.resume(&mut slot, Some(result)) ▶ Step::Ready(reply)
//! callback(reply)
//! ```

use std::fmt;
use std::os::unix::io::RawFd;

/// Terminal status of a database operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbStatus {
    Ok,
    NotFound,
    /// Family dropped or never opened. Detected at enqueue time.
    InvalidHandle,
    /// Queue overflow, ring overflow, or shutdown.
    Cancelled,
    /// Kernel I/O error (positive errno).
    IoError(i32),
    /// On-disk data did not decode.
    Corruption,
    /// Engine-specific failure.
    Other(String),
}

impl DbStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DbStatus::Ok)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbStatus::NotFound)
    }
}

impl fmt::Display for DbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbStatus::Ok => write!(f, "ok"),
            DbStatus::NotFound => write!(f, "not found"),
            DbStatus::InvalidHandle => write!(f, "invalid handle"),
            DbStatus::Cancelled => write!(f, "cancelled"),
            DbStatus::IoError(e) => write!(f, "I/O error: errno {}", e),
            DbStatus::Corruption => write!(f, "corruption"),
            DbStatus::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// A database request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbRequest {
    Get { key: Vec<u8> },
    Put { key: Vec<u8>, value: Vec<u8> },
    MultiGet { keys: Vec<Vec<u8>> },
    Erase { key: Vec<u8> },
}

impl DbRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            DbRequest::Get { .. } => "get",
            DbRequest::Put { .. } => "put",
            DbRequest::MultiGet { .. } => "multi_get",
            DbRequest::Erase { .. } => "erase",
        }
    }
}

/// Value lookup result: status plus the value when found.
pub type Lookup = (DbStatus, Option<Vec<u8>>);

/// Terminal reply of a database operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbReply {
    /// Put / Erase, or any request that failed as a whole.
    Status(DbStatus),
    /// Get.
    Value(DbStatus, Option<Vec<u8>>),
    /// MultiGet, one entry per key in request order.
    Values(Vec<Lookup>),
}

impl DbReply {
    pub fn cancelled() -> Self {
        DbReply::Status(DbStatus::Cancelled)
    }

    /// Overall status. For `Values`, the first non-ok, non-not-found status.
    pub fn into_status(self) -> DbStatus {
        match self {
            DbReply::Status(s) | DbReply::Value(s, _) => s,
            DbReply::Values(v) => v
                .into_iter()
                .map(|(s, _)| s)
                .find(|s| !s.is_ok() && !s.is_not_found())
                .unwrap_or(DbStatus::Ok),
        }
    }

    pub fn into_value(self) -> Lookup {
        match self {
            DbReply::Value(s, v) => (s, v),
            DbReply::Status(s) => (s, None),
            DbReply::Values(mut v) => {
                if v.len() == 1 {
                    v.remove(0)
                } else {
                    (DbStatus::Other("multi_get reply for get".into()), None)
                }
            }
        }
    }

    /// Per-key results. A whole-request failure is repeated for all `n` keys.
    pub fn into_values(self, n: usize) -> Vec<Lookup> {
        match self {
            DbReply::Values(v) => v,
            DbReply::Status(s) | DbReply::Value(s, _) => vec![(s, None); n],
        }
    }
}

/// One ring transfer requested by a database operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoRequest {
    Read {
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        offset: u64,
    },
    Write {
        fd: RawFd,
        buf: *const u8,
        len: u32,
        offset: u64,
    },
}

/// Where an operation places its next transfer request while resumed.
///
/// The ring thread creates an empty slot, resumes the operation, and on
/// `Step::Pending` submits whatever the operation put in the slot.
#[derive(Debug, Default)]
pub struct IoSlot {
    request: Option<IoRequest>,
}

impl IoSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a read of `len` bytes at `offset` into `buf`.
    ///
    /// # Safety
    /// `buf..buf+len` must stay valid and unaliased until the operation is
    /// resumed with the result. Buffers owned by the operation itself
    /// satisfy this: the ring thread keeps the operation alive until then.
    pub unsafe fn read(&mut self, fd: RawFd, buf: *mut u8, len: u32, offset: u64) {
        self.request = Some(IoRequest::Read { fd, buf, len, offset });
    }

    /// Request a write of `len` bytes at `offset` from `buf`.
    ///
    /// # Safety
    /// Same contract as [`IoSlot::read`].
    pub unsafe fn write(&mut self, fd: RawFd, buf: *const u8, len: u32, offset: u64) {
        self.request = Some(IoRequest::Write { fd, buf, len, offset });
    }

    pub fn take(&mut self) -> Option<IoRequest> {
        self.request.take()
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_none()
    }
}

/// Outcome of one `resume`.
#[derive(Debug)]
pub enum Step {
    /// One transfer was placed in the slot; resume with its result.
    Pending,
    Ready(DbReply),
}

/// A resumable database operation.
///
/// `last` is `None` on the first resume and `Some(result)` afterwards,
/// where `result` is the byte count or negative errno of the transfer the
/// operation requested.
pub trait DbOperation: Send {
    fn resume(&mut self, io: &mut IoSlot, last: Option<i32>) -> Step;
}

/// A database engine.
///
/// `start` runs on the ring thread; it must not block.
pub trait DbEngine: Send + Sync + 'static {
    /// Column family reference carried by jobs.
    type Family: Clone + Send + 'static;

    /// False for dropped or unknown families.
    fn is_open(&self, family: &Self::Family) -> bool;

    fn start(&self, family: &Self::Family, request: DbRequest) -> Box<dyn DbOperation>;
}

/// An operation that is already finished.
pub struct Finished(Option<DbReply>);

impl Finished {
    pub fn new(reply: DbReply) -> Box<dyn DbOperation> {
        Box::new(Finished(Some(reply)))
    }
}

impl DbOperation for Finished {
    fn resume(&mut self, _io: &mut IoSlot, _last: Option<i32>) -> Step {
        Step::Ready(
            self.0
                .take()
                .unwrap_or(DbReply::Status(DbStatus::Other("resumed after completion".into()))),
        )
    }
}
