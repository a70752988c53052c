//! Manager and ring configuration.
//!
//! Builder-style setters over plain structs with sane defaults, plus
//! `from_env()` for deployments that tune through the environment.

use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::env::{env_get, env_get_bool, env_get_millis, env_get_opt, env_get_str};
use crate::error::{Result, RingioError};

/// Configuration for one io_uring instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of SQ entries. Must be a power of 2.
    pub sq_entries: u32,
    /// Number of CQ entries. Defaults to 2 * sq_entries.
    pub cq_entries: Option<u32>,
    /// Enable `IORING_SETUP_SQPOLL` with this idle timeout.
    pub sqpoll_idle_ms: Option<u32>,
    /// Share the kernel worker pool (io-wq) of the ring behind this fd.
    pub attach_wq: Option<RawFd>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            sq_entries: 256,
            cq_entries: None,
            sqpoll_idle_ms: None,
            attach_wq: None,
        }
    }
}

impl RingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sq_entries < 2 {
            return Err(RingioError::InvalidConfig("sq_entries must be >= 2"));
        }
        if !self.sq_entries.is_power_of_two() {
            return Err(RingioError::InvalidConfig("sq_entries must be a power of 2"));
        }
        if let Some(cq) = self.cq_entries {
            if cq < self.sq_entries {
                return Err(RingioError::InvalidConfig("cq_entries must be >= sq_entries"));
            }
        }
        Ok(())
    }
}

/// Configuration shared by `FileManager`, `DataBaseManager` and their pools.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Subsystem tag: names the ring thread and the logging span.
    pub name: String,
    pub ring: RingConfig,
    /// Bounded event queue capacity.
    pub queue_capacity: usize,
    /// Members per pool.
    pub pool_size: usize,
    /// Pool members 1..N attach to member 0's kernel workers.
    pub share_kernel_workers: bool,
    /// Attempts to enqueue the Close job when the queue is full.
    pub close_retry_attempts: u32,
    /// Sleep between Close attempts and between shutdown polls.
    pub close_retry_interval: Duration,
    /// Upper bound on waiting for in-flight work at drop.
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "ringio".to_string(),
            ring: RingConfig::default(),
            queue_capacity: 4096,
            pool_size: 4,
            share_kernel_workers: true,
            close_retry_attempts: 100,
            close_retry_interval: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `RINGIO_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            name: env_get_str("RINGIO_NAME", &d.name),
            ring: RingConfig {
                sq_entries: env_get("RINGIO_SQ_ENTRIES", d.ring.sq_entries),
                cq_entries: env_get_opt("RINGIO_CQ_ENTRIES"),
                sqpoll_idle_ms: env_get_opt("RINGIO_SQPOLL_IDLE_MS"),
                attach_wq: None,
            },
            queue_capacity: env_get("RINGIO_QUEUE_CAPACITY", d.queue_capacity),
            pool_size: env_get("RINGIO_POOL_SIZE", d.pool_size),
            share_kernel_workers: env_get_bool(
                "RINGIO_SHARE_KERNEL_WORKERS",
                d.share_kernel_workers,
            ),
            shutdown_timeout: env_get_millis("RINGIO_SHUTDOWN_TIMEOUT_MS", d.shutdown_timeout),
            ..d
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn sq_entries(mut self, n: u32) -> Self {
        self.ring.sq_entries = n;
        self
    }

    pub fn cq_entries(mut self, n: u32) -> Self {
        self.ring.cq_entries = Some(n);
        self
    }

    pub fn sqpoll_idle_ms(mut self, ms: u32) -> Self {
        self.ring.sqpoll_idle_ms = Some(ms);
        self
    }

    pub fn attach_wq(mut self, fd: RawFd) -> Self {
        self.ring.attach_wq = Some(fd);
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn share_kernel_workers(mut self, share: bool) -> Self {
        self.share_kernel_workers = share;
        self
    }

    pub fn close_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.close_retry_attempts = attempts;
        self.close_retry_interval = interval;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.ring.validate()?;
        if self.name.is_empty() || self.name.contains('\0') {
            return Err(RingioError::InvalidConfig("name must be non-empty without NUL"));
        }
        if self.queue_capacity == 0 {
            return Err(RingioError::InvalidConfig("queue_capacity must be > 0"));
        }
        if self.pool_size == 0 {
            return Err(RingioError::InvalidConfig("pool_size must be > 0"));
        }
        Ok(())
    }
}
