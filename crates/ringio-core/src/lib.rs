//! # ringio-core — Type definitions for ringio
//!
//! This crate defines the vocabulary shared by every ringio component:
//! the jobs producers hand to a ring thread, the result codes delivered
//! back through callbacks, the database engine seam, and configuration.
//!
//! ## Design principle
//!
//! > "Closed variant sets, open engines."
//!
//! Jobs are plain sum types dispatched with a `match` on the ring thread.
//! The only trait seam is the database engine, because the engine is the
//! one collaborator whose internals ringio never owns.

pub mod code;
pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod job;

pub use config::{ManagerConfig, RingConfig};
pub use db::{
    DbEngine, DbOperation, DbReply, DbRequest, DbStatus, Finished, IoRequest, IoSlot, Lookup, Step,
};
pub use error::{Result, RingioError};
pub use job::{DbCallback, DbJob, FileCallback, FileJob, IoOutcome};
