//! # ringio-module — Default implementations
//!
//! The concrete pieces a ring thread is built from. Each one is small,
//! owns exactly one OS resource, and knows nothing about the others.
//!
//! | Piece               | Backed by                         |
//! |---------------------|-----------------------------------|
//! | `Semaphore`         | eventfd (`EFD_SEMAPHORE`)         |
//! | `BoundedEventQueue` | crossbeam `ArrayQueue`            |
//! | `Ring`              | `io_uring` (io-uring crate)       |
//! | `LogStore`          | append-only log files on the Ring |
//! | `RocksDbEngine`     | rocksdb (feature = "rocksdb")     |

pub mod event_queue;
pub mod log_store;
pub mod ring;
pub mod semaphore;

#[cfg(feature = "rocksdb")]
pub mod rocksdb_store;

pub use event_queue::BoundedEventQueue;
pub use log_store::{FamilyHandle, LogStore};
pub use ring::Ring;
pub use semaphore::{Semaphore, SemaphoreMode};

#[cfg(feature = "rocksdb")]
pub use rocksdb_store::RocksDbEngine;
