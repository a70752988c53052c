//! # ringio — callback I/O over a dedicated io_uring thread
//!
//! ```text
//!  producer threads / tokio tasks
//!        │  read / write / get / put ...          (callback, _async, _blocking)
//!        ▼
//!  ┌──────────────┐  emplace   ┌───────────────────┐
//!  │ FileManager  │──────────▶ │ BoundedEventQueue │
//!  │ DataBase-    │  sem.add() └─────────┬─────────┘
//!  │   Manager    │─── eventfd ───┐      │ pop
//!  └──────────────┘               ▼      ▼
//!                           ┌──────────────────────┐
//!                           │ ring thread          │── SQE ──▶ kernel
//!                           │ (ringio-executor)    │◀─ CQE ───
//!                           └──────────┬───────────┘
//!                                      │ callback(result)
//!                                      ▼
//!                         oneshot → awaiting task / blocked thread
//! ```
//!
//! Every accepted job has its callback invoked exactly once: by the ring
//! thread on completion, or synchronously when the job is refused
//! (`-EBADF` / `InvalidHandle` for bad handles, `-ECANCELED` / `Cancelled`
//! when the queue is full).

mod handle;
pub mod db_manager;
pub mod file_manager;
pub mod pool;
pub mod promise;

pub use db_manager::DataBaseManager;
pub use file_manager::FileManager;
pub use pool::{DataBaseManagerPool, FileManagerPool, Pool};
pub use promise::is_coroutine_context;

pub use ringio_core::code::{BAD_HANDLE, CANCELED};
pub use ringio_core::{
    DbEngine, DbReply, DbRequest, DbStatus, IoOutcome, Lookup, ManagerConfig, Result, RingConfig,
    RingioError,
};
pub use ringio_module::{FamilyHandle, LogStore};

#[cfg(feature = "rocksdb")]
pub use ringio_module::RocksDbEngine;
