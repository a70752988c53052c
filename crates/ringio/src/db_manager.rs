//! `DataBaseManager` — key/value operations on a ring thread.
//!
//! Generic over the engine. Each request becomes a `DbOperation` on the
//! ring thread, which resumes it after every transfer it asks for; the
//! reply then goes to the callback.

use std::sync::Arc;

use ringio_core::config::ManagerConfig;
use ringio_core::db::{DbEngine, DbReply, DbRequest, DbStatus, Lookup};
use ringio_core::error::Result;
use ringio_core::job::{DbCallback, DbJob};
use ringio_executor::{DbHandler, QueuedJob};
use tokio::sync::oneshot;

use crate::handle::RingWorker;
use crate::promise;

pub struct DataBaseManager<E: DbEngine> {
    engine: Arc<E>,
    worker: RingWorker<DbJob<E::Family>>,
}

impl<E: DbEngine> DataBaseManager<E> {
    pub fn new(engine: Arc<E>, config: ManagerConfig) -> Result<Self> {
        let worker = RingWorker::start("db", &config, DbHandler::new(engine.clone()))?;
        Ok(Self { engine, worker })
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn ring_fd(&self) -> std::os::unix::io::RawFd {
        self.worker.ring_fd()
    }

    pub fn submitted(&self) -> u64 {
        self.worker.submitted()
    }

    pub fn in_flight(&self) -> usize {
        self.worker.in_flight()
    }

    pub fn completed(&self) -> u64 {
        self.worker.completed()
    }

    // ── Callback API ─────────────────────────────────────────────────

    pub fn get<F>(&self, family: &E::Family, key: impl Into<Vec<u8>>, callback: F)
    where
        F: FnOnce(DbStatus, Option<Vec<u8>>) + Send + 'static,
    {
        let request = DbRequest::Get { key: key.into() };
        self.submit(family, request, Box::new(move |reply: DbReply| {
            let (status, value) = reply.into_value();
            callback(status, value)
        }));
    }

    pub fn put<F>(
        &self,
        family: &E::Family,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        callback: F,
    ) where
        F: FnOnce(DbStatus) + Send + 'static,
    {
        let request = DbRequest::Put { key: key.into(), value: value.into() };
        self.submit(family, request, Box::new(move |reply: DbReply| callback(reply.into_status())));
    }

    /// One result per key, in key order.
    pub fn multi_get<F>(&self, family: &E::Family, keys: Vec<Vec<u8>>, callback: F)
    where
        F: FnOnce(Vec<Lookup>) + Send + 'static,
    {
        let n = keys.len();
        self.submit(family, DbRequest::MultiGet { keys }, Box::new(move |reply: DbReply| {
            callback(reply.into_values(n))
        }));
    }

    /// Erasing a missing key succeeds.
    pub fn erase<F>(&self, family: &E::Family, key: impl Into<Vec<u8>>, callback: F)
    where
        F: FnOnce(DbStatus) + Send + 'static,
    {
        let request = DbRequest::Erase { key: key.into() };
        self.submit(family, request, Box::new(move |reply: DbReply| callback(reply.into_status())));
    }

    // ── Task context ─────────────────────────────────────────────────

    pub async fn get_async(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> Lookup {
        let rx = self.request(family, DbRequest::Get { key: key.into() });
        promise::resolve(rx, DbReply::cancelled).await.into_value()
    }

    pub async fn put_async(
        &self,
        family: &E::Family,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> DbStatus {
        let rx = self.request(family, DbRequest::Put { key: key.into(), value: value.into() });
        promise::resolve(rx, DbReply::cancelled).await.into_status()
    }

    pub async fn multi_get_async(&self, family: &E::Family, keys: Vec<Vec<u8>>) -> Vec<Lookup> {
        let n = keys.len();
        let rx = self.request(family, DbRequest::MultiGet { keys });
        promise::resolve(rx, DbReply::cancelled).await.into_values(n)
    }

    pub async fn erase_async(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> DbStatus {
        let rx = self.request(family, DbRequest::Erase { key: key.into() });
        promise::resolve(rx, DbReply::cancelled).await.into_status()
    }

    // ── Thread context ───────────────────────────────────────────────

    pub fn get_blocking(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> Lookup {
        let rx = self.request(family, DbRequest::Get { key: key.into() });
        promise::wait(rx, DbReply::cancelled).into_value()
    }

    pub fn put_blocking(
        &self,
        family: &E::Family,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> DbStatus {
        let rx = self.request(family, DbRequest::Put { key: key.into(), value: value.into() });
        promise::wait(rx, DbReply::cancelled).into_status()
    }

    pub fn multi_get_blocking(&self, family: &E::Family, keys: Vec<Vec<u8>>) -> Vec<Lookup> {
        let n = keys.len();
        let rx = self.request(family, DbRequest::MultiGet { keys });
        promise::wait(rx, DbReply::cancelled).into_values(n)
    }

    pub fn erase_blocking(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> DbStatus {
        let rx = self.request(family, DbRequest::Erase { key: key.into() });
        promise::wait(rx, DbReply::cancelled).into_status()
    }

    // ── Enqueue ──────────────────────────────────────────────────────

    fn request(&self, family: &E::Family, request: DbRequest) -> oneshot::Receiver<DbReply> {
        let (tx, rx) = promise::channel();
        self.submit(family, request, Box::new(move |reply| {
            let _ = tx.send(reply);
        }));
        rx
    }

    fn submit(&self, family: &E::Family, request: DbRequest, callback: DbCallback) {
        if !self.engine.is_open(family) {
            callback(DbReply::Status(DbStatus::InvalidHandle));
            return;
        }
        let kind = request.kind();
        let job = DbJob::Op { family: family.clone(), request, callback };
        if let Err(job) = self.worker.push(job) {
            tracing::warn!(subsystem = %self.name(), kind, "event queue full, cancelling");
            job.abort();
        }
    }
}

impl<E: DbEngine> std::fmt::Debug for DataBaseManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBaseManager")
            .field("name", &self.name())
            .field("submitted", &self.submitted())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringio_module::LogStore;
    use std::sync::mpsc;

    #[test]
    fn test_dropped_family_is_synchronous() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(dir.path()).unwrap());
        let family = store.create_family("gone").unwrap();
        store.drop_family("gone").unwrap();

        let db = DataBaseManager::new(store, ManagerConfig::new().name("db-unit")).unwrap();
        let (tx, rx) = mpsc::channel();
        db.put(&family, "k", "v", move |st| tx.send(st).unwrap());
        assert_eq!(rx.try_recv().unwrap(), DbStatus::InvalidHandle);
        assert_eq!(db.get_blocking(&family, "k"), (DbStatus::InvalidHandle, None));
        assert_eq!(db.submitted(), 0);
    }

    #[test]
    fn test_blocking_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(dir.path()).unwrap());
        let family = store.create_family("default").unwrap();
        let db = DataBaseManager::new(store, ManagerConfig::new().name("db-unit")).unwrap();

        assert_eq!(db.put_blocking(&family, "alpha", "1"), DbStatus::Ok);
        assert_eq!(db.get_blocking(&family, "alpha"), (DbStatus::Ok, Some(b"1".to_vec())));
        assert_eq!(db.erase_blocking(&family, "missing"), DbStatus::Ok);
    }
}
