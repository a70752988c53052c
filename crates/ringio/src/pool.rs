//! Round-robin pools of managers.
//!
//! Members share nothing but, optionally, the kernel's io-wq workers:
//! with `share_kernel_workers`, members 1..N are built with
//! `attach_wq = member 0's ring fd`.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ringio_core::config::ManagerConfig;
use ringio_core::db::{DbEngine, DbStatus, Lookup};
use ringio_core::error::{Result, RingioError};
use ringio_core::job::IoOutcome;

use crate::db_manager::DataBaseManager;
use crate::file_manager::FileManager;

pub struct Pool<M> {
    members: Vec<M>,
    cursor: AtomicUsize,
}

pub type FileManagerPool = Pool<FileManager>;
pub type DataBaseManagerPool<E> = Pool<DataBaseManager<E>>;

impl<M> Pool<M> {
    pub fn from_members(members: Vec<M>) -> Result<Self> {
        if members.is_empty() {
            return Err(RingioError::InvalidConfig("pool needs at least one member"));
        }
        Ok(Self { members, cursor: AtomicUsize::new(0) })
    }

    /// The next member in round-robin order.
    pub fn next(&self) -> &M {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.members.len();
        &self.members[i]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[M] {
        &self.members
    }
}

/// Build `n` members, naming each `<name>-<i>` and attaching members
/// after the first to its kernel workers when asked to.
fn build<M>(
    n: usize,
    config: &ManagerConfig,
    ring_fd: impl Fn(&M) -> RawFd,
    mut make: impl FnMut(ManagerConfig) -> Result<M>,
) -> Result<Vec<M>> {
    if n == 0 {
        return Err(RingioError::InvalidConfig("pool_size must be > 0"));
    }
    let mut members: Vec<M> = Vec::with_capacity(n);
    for i in 0..n {
        let mut member = config.clone().name(format!("{}-{}", config.name, i));
        if config.share_kernel_workers {
            if let Some(first) = members.first() {
                member = member.attach_wq(ring_fd(first));
            }
        }
        members.push(make(member)?);
    }
    Ok(members)
}

impl Pool<FileManager> {
    pub fn new(n: usize, config: ManagerConfig) -> Result<Self> {
        let members = build(n, &config, FileManager::ring_fd, FileManager::new)?;
        tracing::info!(subsystem = %config.name, members = n, "file manager pool started");
        Self::from_members(members)
    }

    /// `config.pool_size` members.
    pub fn with_config(config: ManagerConfig) -> Result<Self> {
        Self::new(config.pool_size, config)
    }

    pub fn read<F>(&self, fd: RawFd, buf: Vec<u8>, offset: i64, callback: F)
    where
        F: FnOnce(i32, Vec<u8>) + Send + 'static,
    {
        self.next().read(fd, buf, offset, callback)
    }

    pub fn write<F>(&self, fd: RawFd, buf: Vec<u8>, offset: i64, callback: F)
    where
        F: FnOnce(i32, Vec<u8>) + Send + 'static,
    {
        self.next().write(fd, buf, offset, callback)
    }

    pub async fn read_async(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        self.next().read_async(fd, buf, offset).await
    }

    pub async fn write_async(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        self.next().write_async(fd, buf, offset).await
    }

    pub fn read_blocking(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        self.next().read_blocking(fd, buf, offset)
    }

    pub fn write_blocking(&self, fd: RawFd, buf: Vec<u8>, offset: i64) -> IoOutcome {
        self.next().write_blocking(fd, buf, offset)
    }
}

impl<E: DbEngine> Pool<DataBaseManager<E>> {
    pub fn new(n: usize, engine: Arc<E>, config: ManagerConfig) -> Result<Self> {
        let members = build(n, &config, DataBaseManager::ring_fd, |c| {
            DataBaseManager::new(engine.clone(), c)
        })?;
        tracing::info!(subsystem = %config.name, members = n, "database manager pool started");
        Self::from_members(members)
    }

    pub fn with_config(engine: Arc<E>, config: ManagerConfig) -> Result<Self> {
        Self::new(config.pool_size, engine, config)
    }

    pub fn get<F>(&self, family: &E::Family, key: impl Into<Vec<u8>>, callback: F)
    where
        F: FnOnce(DbStatus, Option<Vec<u8>>) + Send + 'static,
    {
        self.next().get(family, key, callback)
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
        self.next().put(family, key, value, callback)
    }

    pub fn multi_get<F>(&self, family: &E::Family, keys: Vec<Vec<u8>>, callback: F)
    where
        F: FnOnce(Vec<Lookup>) + Send + 'static,
    {
        self.next().multi_get(family, keys, callback)
    }

    pub fn erase<F>(&self, family: &E::Family, key: impl Into<Vec<u8>>, callback: F)
    where
        F: FnOnce(DbStatus) + Send + 'static,
    {
        self.next().erase(family, key, callback)
    }

    pub async fn get_async(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> Lookup {
        self.next().get_async(family, key).await
    }

    pub async fn put_async(
        &self,
        family: &E::Family,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> DbStatus {
        self.next().put_async(family, key, value).await
    }

    pub async fn multi_get_async(&self, family: &E::Family, keys: Vec<Vec<u8>>) -> Vec<Lookup> {
        self.next().multi_get_async(family, keys).await
    }

    pub async fn erase_async(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> DbStatus {
        self.next().erase_async(family, key).await
    }

    pub fn get_blocking(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> Lookup {
        self.next().get_blocking(family, key)
    }

    pub fn put_blocking(
        &self,
        family: &E::Family,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> DbStatus {
        self.next().put_blocking(family, key, value)
    }

    pub fn multi_get_blocking(&self, family: &E::Family, keys: Vec<Vec<u8>>) -> Vec<Lookup> {
        self.next().multi_get_blocking(family, keys)
    }

    pub fn erase_blocking(&self, family: &E::Family, key: impl Into<Vec<u8>>) -> DbStatus {
        self.next().erase_blocking(family, key)
    }
}
