//! `RocksDbEngine` — RocksDB behind the `DbEngine` seam.
//!
//! RocksDB does its own, blocking, I/O. Each call runs on one of the
//! engine's helper threads; the operation meanwhile parks on a ring read of
//! its own semaphore eventfd, which the helper signals once the reply is
//! stored. The ring thread never waits on RocksDB.
//!
//! Families are column family names fixed at open time.

use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use rocksdb::{ErrorKind, Options, DB};

use ringio_core::db::{
    DbEngine, DbOperation, DbReply, DbRequest, DbStatus, Finished, IoSlot, Lookup, Step,
};

use crate::semaphore::{Semaphore, SemaphoreMode};

const DEFAULT_HELPERS: usize = 2;

type Task = Box<dyn FnOnce() + Send>;

#[derive(Debug)]
pub enum OpenError {
    Db(rocksdb::Error),
    Spawn(std::io::Error),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Db(e) => write!(f, "rocksdb open: {}", e),
            Self::Spawn(e) => write!(f, "failed to spawn rocksdb helper: {}", e),
        }
    }
}

impl std::error::Error for OpenError {}

#[derive(Clone)]
pub struct RocksDbEngine {
    db: Arc<DB>,
    tasks: Sender<Task>,
}

impl RocksDbEngine {
    /// Open (or create) the database at `path` with the given column
    /// families; `"default"` is always present.
    pub fn open<P: AsRef<Path>>(path: P, families: &[&str]) -> Result<Self, OpenError> {
        Self::open_with_helpers(path, families, DEFAULT_HELPERS)
    }

    /// As `open`, with `helpers` threads running RocksDB calls.
    pub fn open_with_helpers<P: AsRef<Path>>(
        path: P,
        families: &[&str],
        helpers: usize,
    ) -> Result<Self, OpenError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, families.iter().copied()).map_err(OpenError::Db)?;
        let (tasks, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        for i in 0..helpers.max(1) {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("ringio-rocksdb-{}", i))
                .spawn(move || helper(rx))
                .map_err(OpenError::Spawn)?;
        }
        tracing::info!(helpers = helpers.max(1), "rocksdb engine opened");
        Ok(Self {
            db: Arc::new(db),
            tasks,
        })
    }

    pub fn db(&self) -> &DB {
        &self.db
    }
}

/// Helper thread body. Exits when every engine clone is gone.
fn helper(rx: Arc<Mutex<Receiver<Task>>>) {
    loop {
        let task = {
            let rx = rx.lock().unwrap_or_else(|p| p.into_inner());
            rx.recv()
        };
        match task {
            Ok(task) => task(),
            Err(_) => return,
        }
    }
}

fn run(db: &DB, family: &str, request: DbRequest) -> DbReply {
    let Some(cf) = db.cf_handle(family) else {
        return DbReply::Status(DbStatus::InvalidHandle);
    };
    match request {
        DbRequest::Get { key } => {
            let (status, value) = lookup(db.get_cf(cf, key));
            DbReply::Value(status, value)
        }
        DbRequest::Put { key, value } => DbReply::Status(status_of(db.put_cf(cf, key, value))),
        DbRequest::Erase { key } => DbReply::Status(status_of(db.delete_cf(cf, key))),
        DbRequest::MultiGet { keys } => DbReply::Values(
            db.multi_get_cf(keys.iter().map(|k| (cf, k.as_slice())))
                .into_iter()
                .map(lookup)
                .collect(),
        ),
    }
}

impl DbEngine for RocksDbEngine {
    type Family = String;

    fn is_open(&self, family: &String) -> bool {
        self.db.cf_handle(family).is_some()
    }

    fn start(&self, family: &String, request: DbRequest) -> Box<dyn DbOperation> {
        let wake = match Semaphore::new(0, SemaphoreMode::Blocking) {
            Ok(sem) => Arc::new(sem),
            Err(e) => return Finished::new(DbReply::Status(DbStatus::Other(e.to_string()))),
        };
        let reply = Arc::new(Mutex::new(None));

        let db = self.db.clone();
        let family = family.clone();
        let (done, signal) = (reply.clone(), wake.clone());
        let task: Task = Box::new(move || {
            let out = run(&db, &family, request);
            *done.lock().unwrap_or_else(|p| p.into_inner()) = Some(out);
            signal.add();
        });
        if self.tasks.send(task).is_err() {
            return Finished::new(DbReply::Status(DbStatus::Other(
                "rocksdb helpers stopped".into(),
            )));
        }

        Box::new(HelperOp {
            wake,
            reply,
            buf: Box::new(0),
        })
    }
}

/// Waits on the ring for a helper thread to finish one RocksDB call.
struct HelperOp {
    wake: Arc<Semaphore>,
    reply: Arc<Mutex<Option<DbReply>>>,
    /// Target of the eventfd read.
    buf: Box<u64>,
}

impl DbOperation for HelperOp {
    fn resume(&mut self, io: &mut IoSlot, last: Option<i32>) -> Step {
        match last {
            None => {
                // Safety: `buf` is boxed and owned by the operation, which the
                // ring thread keeps alive until it is resumed with the result.
                unsafe {
                    io.read(self.wake.fd(), &mut *self.buf as *mut u64 as *mut u8, 8, 0);
                }
                Step::Pending
            }
            Some(n) if n < 0 => Step::Ready(DbReply::Status(DbStatus::IoError(-n))),
            Some(_) => {
                let reply = self.reply.lock().unwrap_or_else(|p| p.into_inner()).take();
                Step::Ready(reply.unwrap_or(DbReply::Status(DbStatus::Other(
                    "helper signalled without a reply".into(),
                ))))
            }
        }
    }
}

fn lookup(res: Result<Option<Vec<u8>>, rocksdb::Error>) -> Lookup {
    match res {
        Ok(Some(v)) => (DbStatus::Ok, Some(v)),
        Ok(None) => (DbStatus::NotFound, None),
        Err(e) => (map_error(&e), None),
    }
}

fn status_of(res: Result<(), rocksdb::Error>) -> DbStatus {
    match res {
        Ok(()) => DbStatus::Ok,
        Err(e) => map_error(&e),
    }
}

fn map_error(e: &rocksdb::Error) -> DbStatus {
    match e.kind() {
        ErrorKind::Corruption => DbStatus::Corruption,
        ErrorKind::IOError => DbStatus::IoError(libc::EIO),
        _ => DbStatus::Other(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringio_core::db::IoRequest;

    /// Run an operation, servicing its eventfd read with a blocking read(2).
    fn run(engine: &RocksDbEngine, family: &str, req: DbRequest) -> DbReply {
        let mut op = engine.start(&family.to_string(), req);
        let mut slot = IoSlot::new();
        let mut last = None;
        loop {
            match op.resume(&mut slot, last) {
                Step::Ready(reply) => return reply,
                Step::Pending => {
                    let res = match slot.take().expect("pending without a request") {
                        IoRequest::Read { fd, buf, len, .. } => unsafe {
                            libc::read(fd, buf as *mut libc::c_void, len as usize)
                        },
                        IoRequest::Write { .. } => panic!("rocksdb operations only wait"),
                    };
                    last = Some(res as i32);
                }
            }
        }
    }

    #[test]
    fn test_put_get_erase() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RocksDbEngine::open(dir.path(), &["default", "users"]).unwrap();

        let put = DbRequest::Put { key: b"k".to_vec(), value: b"v".to_vec() };
        assert_eq!(run(&engine, "users", put).into_status(), DbStatus::Ok);

        let got = run(&engine, "users", DbRequest::Get { key: b"k".to_vec() }).into_value();
        assert_eq!(got, (DbStatus::Ok, Some(b"v".to_vec())));

        run(&engine, "users", DbRequest::Erase { key: b"k".to_vec() });
        let got = run(&engine, "users", DbRequest::Get { key: b"k".to_vec() }).into_value();
        assert_eq!(got, (DbStatus::NotFound, None));
    }

    #[test]
    fn test_unknown_family() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RocksDbEngine::open(dir.path(), &["default"]).unwrap();
        assert!(!engine.is_open(&"missing".to_string()));
        let reply = run(&engine, "missing", DbRequest::Get { key: b"k".to_vec() });
        assert_eq!(reply.into_status(), DbStatus::InvalidHandle);
    }

    #[test]
    fn test_call_runs_off_the_calling_thread() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RocksDbEngine::open_with_helpers(dir.path(), &["default"], 1).unwrap();
        let mut op = engine.start(
            &"default".to_string(),
            DbRequest::Put { key: b"a".to_vec(), value: b"1".to_vec() },
        );
        let mut slot = IoSlot::new();
        assert!(matches!(op.resume(&mut slot, None), Step::Pending));
        assert!(matches!(slot.take(), Some(IoRequest::Read { len: 8, .. })));

        // The helper stores the write without any further resume.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while engine.db().get(b"a").unwrap().is_none() {
            assert!(std::time::Instant::now() < deadline, "helper never ran the put");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}
