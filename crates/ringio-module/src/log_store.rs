//! `LogStore` — a small log-structured key/value engine driven by the ring.
//!
//! One append-only file per column family (`<dir>/<family>.log`), and an
//! in-memory index rebuilt by scanning the file on open. All data-path
//! reads and writes are issued as ring transfers through `IoSlot`, so a
//! `DataBaseManager<LogStore>` never blocks its ring thread on disk.
//!
//! # Record layout
//!
//! ```text
//! ┌───────────┬─────────┬─────────────┬─────────────┬──────┬─────────┬───────────┐
//! │ magic u32 │ crc u32 │ key_len u32 │ val_len u32 │ kind │ key ... │ value ... │
//! └───────────┴─────────┴─────────────┴─────────────┴──────┴─────────┴───────────┘
//! all integers LE; crc32 covers key_len through the end of the value
//! kind 0 = put, 1 = tombstone (val_len = 0), 2 = padding (key_len = 0)
//! ```
//!
//! Writers reserve their offset with an atomic tail, so concurrent puts
//! never overlap. The index keeps, per key, the newest record by log
//! offset; a put that completes after a newer put or erase of the same key
//! does not roll the index back.
//!
//! A write that fails or is dropped before completing overwrites its
//! reserved range with a padding record. When even that fails the range
//! stays a hole; recovery resynchronises on the next record whose magic and
//! checksum verify, and only truncates a tail with no valid record after it.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crc32fast::Hasher;
use ringio_core::db::{
    DbEngine, DbOperation, DbReply, DbRequest, DbStatus, Finished, IoSlot, Lookup, Step,
};

const MAGIC: u32 = 0x5249_4e47;
const HEADER_LEN: usize = 17;
/// Start of the checksummed part of a record.
const CRC_FROM: usize = 8;
const KIND_PUT: u8 = 0;
const KIND_TOMBSTONE: u8 = 1;
const KIND_PADDING: u8 = 2;
const LOG_EXT: &str = "log";

/// Index entry: where the newest record for a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    /// Offset of the record header; orders records of the same key.
    record: u64,
    /// Offset of the value bytes.
    value: u64,
    len: u32,
    live: bool,
}

struct Family {
    name: String,
    path: PathBuf,
    file: File,
    tail: AtomicU64,
    index: RwLock<HashMap<Vec<u8>, Slot>>,
    dropped: AtomicBool,
}

impl Family {
    fn open(name: &str, path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let bytes = fs::read(&path)?;
        let recovered = scan(&bytes);
        if recovered.skipped > 0 {
            tracing::warn!(
                family = name,
                skipped_bytes = recovered.skipped,
                "skipped unreadable log regions"
            );
        }
        let good_end = recovered.end;
        if good_end < bytes.len() {
            tracing::warn!(
                family = name,
                dropped_bytes = bytes.len() - good_end,
                "truncating incomplete tail record"
            );
            file.set_len(good_end as u64)?;
        }
        let index = recovered.index;

        Ok(Self {
            name: name.to_string(),
            path,
            file,
            tail: AtomicU64::new(good_end as u64),
            index: RwLock::new(index),
            dropped: AtomicBool::new(false),
        })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn lookup(&self, key: &[u8]) -> Option<Slot> {
        let index = self.index.read().unwrap_or_else(|p| p.into_inner());
        index.get(key).copied().filter(|s| s.live)
    }

    fn apply(&self, key: Vec<u8>, slot: Slot) {
        let mut index = self.index.write().unwrap_or_else(|p| p.into_inner());
        match index.get(&key) {
            Some(cur) if cur.record > slot.record => {}
            _ => {
                index.insert(key, slot);
            }
        }
    }

    fn live_keys(&self) -> usize {
        let index = self.index.read().unwrap_or_else(|p| p.into_inner());
        index.values().filter(|s| s.live).count()
    }
}

/// Column family reference handed to `DataBaseManager` calls.
#[derive(Clone)]
pub struct FamilyHandle(Arc<Family>);

impl FamilyHandle {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.0.live_keys()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of log written or reserved.
    pub fn log_size(&self) -> u64 {
        self.0.tail.load(Ordering::Acquire)
    }

    pub fn is_dropped(&self) -> bool {
        self.0.dropped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for FamilyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyHandle")
            .field("name", &self.0.name)
            .field("path", &self.0.path)
            .field("dropped", &self.is_dropped())
            .finish()
    }
}

/// The engine: a directory of family logs.
pub struct LogStore {
    dir: PathBuf,
    families: RwLock<HashMap<String, FamilyHandle>>,
}

impl LogStore {
    /// Open (or create) the store at `dir`, loading every existing family.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut families = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let family = Family::open(&name, path)?;
            families.insert(name, FamilyHandle(Arc::new(family)));
        }
        tracing::info!(dir = %dir.display(), families = families.len(), "log store opened");

        Ok(Self {
            dir,
            families: RwLock::new(families),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open family `name`, creating its log when missing.
    pub fn create_family(&self, name: &str) -> io::Result<FamilyHandle> {
        if name.is_empty() || name.contains(['/', '\0']) || name.starts_with('.') {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid family name"));
        }
        let mut families = self.families.write().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = families.get(name) {
            return Ok(existing.clone());
        }
        let path = self.dir.join(format!("{}.{}", name, LOG_EXT));
        let handle = FamilyHandle(Arc::new(Family::open(name, path)?));
        families.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn family(&self, name: &str) -> Option<FamilyHandle> {
        let families = self.families.read().unwrap_or_else(|p| p.into_inner());
        families.get(name).cloned()
    }

    pub fn family_names(&self) -> Vec<String> {
        let families = self.families.read().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = families.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop family `name` and delete its log. Outstanding handles become
    /// invalid; operations already running finish against the open file.
    pub fn drop_family(&self, name: &str) -> io::Result<bool> {
        let mut families = self.families.write().unwrap_or_else(|p| p.into_inner());
        let Some(handle) = families.remove(name) else {
            return Ok(false);
        };
        handle.0.dropped.store(true, Ordering::Release);
        fs::remove_file(&handle.0.path)?;
        Ok(true)
    }
}

impl DbEngine for LogStore {
    type Family = FamilyHandle;

    fn is_open(&self, family: &FamilyHandle) -> bool {
        !family.is_dropped()
    }

    fn start(&self, family: &FamilyHandle, request: DbRequest) -> Box<dyn DbOperation> {
        match request {
            DbRequest::Get { key } => Box::new(GetOp::new(family.clone(), key)),
            DbRequest::MultiGet { keys } => Box::new(MultiGetOp::new(family.clone(), keys)),
            DbRequest::Put { key, value } => {
                match WriteOp::new(family.clone(), KIND_PUT, key, &value) {
                    Some(op) => Box::new(op),
                    None => Finished::new(DbReply::Status(DbStatus::Other(
                        "record too large".into(),
                    ))),
                }
            }
            DbRequest::Erase { key } => match WriteOp::new(family.clone(), KIND_TOMBSTONE, key, &[]) {
                Some(op) => Box::new(op),
                None => Finished::new(DbReply::Status(DbStatus::Other("key too large".into()))),
            },
        }
    }
}

// ── Record codec ─────────────────────────────────────────────────────

fn encode(kind: u8, key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
    let klen = u32::try_from(key.len()).ok()?;
    let vlen = u32::try_from(value.len()).ok()?;
    let total = HEADER_LEN + key.len() + value.len();
    u32::try_from(total).ok()?;

    let mut rec = Vec::with_capacity(total);
    rec.extend_from_slice(&MAGIC.to_le_bytes());
    rec.extend_from_slice(&[0u8; 4]);
    rec.extend_from_slice(&klen.to_le_bytes());
    rec.extend_from_slice(&vlen.to_le_bytes());
    rec.push(kind);
    rec.extend_from_slice(key);
    rec.extend_from_slice(value);
    let crc = checksum(&rec[CRC_FROM..]);
    rec[4..8].copy_from_slice(&crc.to_le_bytes());
    Some(rec)
}

/// A record of kind padding spanning exactly `total` bytes.
fn padding(total: usize) -> Option<Vec<u8>> {
    let body = total.checked_sub(HEADER_LEN)?;
    encode(KIND_PADDING, &[], &vec![0u8; body])
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// A verified record at the start of `bytes`: `(kind, key_len, val_len)`.
fn record_at(bytes: &[u8]) -> Option<(u8, usize, usize)> {
    if bytes.len() < HEADER_LEN || read_u32(bytes, 0) != MAGIC {
        return None;
    }
    let klen = read_u32(bytes, 8) as usize;
    let vlen = read_u32(bytes, 12) as usize;
    let kind = bytes[16];
    let end = HEADER_LEN.checked_add(klen)?.checked_add(vlen)?;
    if kind > KIND_PADDING || end > bytes.len() {
        return None;
    }
    if checksum(&bytes[CRC_FROM..end]) != read_u32(bytes, 4) {
        return None;
    }
    Some((kind, klen, vlen))
}

/// Next offset at or after `from` holding a verified record.
fn resync(bytes: &[u8], from: usize) -> Option<usize> {
    let magic = MAGIC.to_le_bytes();
    (from..bytes.len().saturating_sub(HEADER_LEN - 1))
        .find(|&pos| bytes[pos..pos + 4] == magic && record_at(&bytes[pos..]).is_some())
}

/// What a scan of a log image recovered.
struct Recovered {
    index: HashMap<Vec<u8>, Slot>,
    /// End of the last verified record.
    end: usize,
    /// Bytes of unreadable regions skipped between verified records.
    skipped: usize,
}

/// Rebuild the index from a log image.
fn scan(bytes: &[u8]) -> Recovered {
    let mut index = HashMap::new();
    let mut pos = 0usize;
    let mut skipped = 0usize;
    while pos < bytes.len() {
        let Some((kind, klen, vlen)) = record_at(&bytes[pos..]) else {
            match resync(bytes, pos + 1) {
                Some(next) => {
                    skipped += next - pos;
                    pos = next;
                    continue;
                }
                None => break,
            }
        };
        if kind != KIND_PADDING {
            let key = bytes[pos + HEADER_LEN..pos + HEADER_LEN + klen].to_vec();
            index.insert(
                key,
                Slot {
                    record: pos as u64,
                    value: (pos + HEADER_LEN + klen) as u64,
                    len: vlen as u32,
                    live: kind == KIND_PUT,
                },
            );
        }
        pos += HEADER_LEN + klen + vlen;
    }
    Recovered {
        index,
        end: pos,
        skipped,
    }
}

// ── Transfers ────────────────────────────────────────────────────────

/// A buffer moved to or from the log in one or more ring transfers.
struct Transfer {
    buf: Vec<u8>,
    done: usize,
    offset: u64,
}

enum Progress {
    More,
    Complete,
    Failed(DbStatus),
}

impl Transfer {
    fn new(buf: Vec<u8>, offset: u64) -> Self {
        Self { buf, done: 0, offset }
    }

    fn request_read(&mut self, fd: RawFd, io: &mut IoSlot) {
        let rest = &mut self.buf[self.done..];
        // Safety: the buffer is owned by the operation, which the ring
        // thread keeps alive until it is resumed with the result.
        unsafe {
            io.read(fd, rest.as_mut_ptr(), rest.len() as u32, self.offset + self.done as u64);
        }
    }

    fn request_write(&mut self, fd: RawFd, io: &mut IoSlot) {
        let rest = &self.buf[self.done..];
        // Safety: as in `request_read`.
        unsafe {
            io.write(fd, rest.as_ptr(), rest.len() as u32, self.offset + self.done as u64);
        }
    }

    fn advance(&mut self, result: Option<i32>) -> Progress {
        match result {
            Some(n) if n < 0 => Progress::Failed(DbStatus::IoError(-n)),
            // A read that hits EOF inside an indexed record.
            Some(0) => Progress::Failed(DbStatus::Corruption),
            Some(n) => {
                self.done += n as usize;
                if self.done >= self.buf.len() {
                    Progress::Complete
                } else {
                    Progress::More
                }
            }
            None => Progress::Failed(DbStatus::Other("resumed without a result".into())),
        }
    }
}

// ── Operations ───────────────────────────────────────────────────────

struct GetOp {
    family: FamilyHandle,
    key: Vec<u8>,
    read: Option<Transfer>,
}

impl GetOp {
    fn new(family: FamilyHandle, key: Vec<u8>) -> Self {
        Self { family, key, read: None }
    }
}

impl DbOperation for GetOp {
    fn resume(&mut self, io: &mut IoSlot, last: Option<i32>) -> Step {
        let fd = self.family.0.fd();
        let Some(read) = self.read.as_mut() else {
            let Some(slot) = self.family.0.lookup(&self.key) else {
                return Step::Ready(DbReply::Value(DbStatus::NotFound, None));
            };
            if slot.len == 0 {
                return Step::Ready(DbReply::Value(DbStatus::Ok, Some(Vec::new())));
            }
            let read = self
                .read
                .insert(Transfer::new(vec![0u8; slot.len as usize], slot.value));
            read.request_read(fd, io);
            return Step::Pending;
        };

        match read.advance(last) {
            Progress::More => {
                read.request_read(fd, io);
                Step::Pending
            }
            Progress::Complete => {
                let value = std::mem::take(&mut read.buf);
                Step::Ready(DbReply::Value(DbStatus::Ok, Some(value)))
            }
            Progress::Failed(status) => Step::Ready(DbReply::Value(status, None)),
        }
    }
}

struct MultiGetOp {
    family: FamilyHandle,
    keys: std::vec::IntoIter<Vec<u8>>,
    current: Option<GetOp>,
    results: Vec<Lookup>,
}

impl MultiGetOp {
    fn new(family: FamilyHandle, keys: Vec<Vec<u8>>) -> Self {
        Self {
            family,
            results: Vec::with_capacity(keys.len()),
            keys: keys.into_iter(),
            current: None,
        }
    }
}

impl DbOperation for MultiGetOp {
    fn resume(&mut self, io: &mut IoSlot, mut last: Option<i32>) -> Step {
        loop {
            if self.current.is_none() {
                match self.keys.next() {
                    Some(key) => {
                        self.current = Some(GetOp::new(self.family.clone(), key));
                        last = None;
                    }
                    None => return Step::Ready(DbReply::Values(std::mem::take(&mut self.results))),
                }
            }
            let Some(get) = self.current.as_mut() else {
                continue;
            };
            match get.resume(io, last) {
                Step::Pending => return Step::Pending,
                Step::Ready(reply) => {
                    self.results.push(reply.into_value());
                    self.current = None;
                }
            }
        }
    }
}

/// Put or erase: append one record, then publish it in the index.
struct WriteOp {
    family: FamilyHandle,
    key: Vec<u8>,
    slot: Slot,
    write: Transfer,
    started: bool,
    committed: bool,
}

impl WriteOp {
    fn new(family: FamilyHandle, kind: u8, key: Vec<u8>, value: &[u8]) -> Option<Self> {
        let rec = encode(kind, &key, value)?;
        let record = family.0.tail.fetch_add(rec.len() as u64, Ordering::AcqRel);
        let slot = Slot {
            record,
            value: record + (HEADER_LEN + key.len()) as u64,
            len: value.len() as u32,
            live: kind == KIND_PUT,
        };
        Some(Self {
            family,
            key,
            slot,
            write: Transfer::new(rec, record),
            started: false,
            committed: false,
        })
    }

    /// Overwrite the reserved range with a padding record.
    fn release(&self) {
        let Some(pad) = padding(self.write.buf.len()) else {
            return;
        };
        if let Err(e) = self.family.0.file.write_all_at(&pad, self.slot.record) {
            tracing::warn!(
                family = %self.family.0.name,
                offset = self.slot.record,
                error = %e,
                "could not pad abandoned record"
            );
        }
    }
}

impl DbOperation for WriteOp {
    fn resume(&mut self, io: &mut IoSlot, last: Option<i32>) -> Step {
        let fd = self.family.0.fd();
        if !self.started {
            self.started = true;
            self.write.request_write(fd, io);
            return Step::Pending;
        }
        match self.write.advance(last) {
            Progress::More => {
                self.write.request_write(fd, io);
                Step::Pending
            }
            Progress::Complete => {
                self.committed = true;
                self.family.0.apply(std::mem::take(&mut self.key), self.slot);
                Step::Ready(DbReply::Status(DbStatus::Ok))
            }
            Progress::Failed(status) => Step::Ready(DbReply::Status(status)),
        }
    }
}

impl Drop for WriteOp {
    fn drop(&mut self) {
        if !self.committed {
            self.release();
        }
    }
}
