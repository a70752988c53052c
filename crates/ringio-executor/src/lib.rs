//! # ringio-executor — The Ring Thread
//!
//! One ring thread per manager. It owns the `Ring`, and it is the only
//! thread that ever pops the job queue or touches a completion record.
//!
//! ```text
//! producers                         ring thread
//! ─────────                         ───────────
//! queue.emplace(job)                arm semaphore wait
//! sem.add()  ───── eventfd ───────▶ loop {
//!                                     (res, user_data) = ring.wait_for_completion()
//!                                     user_data == SEMAPHORE_TOKEN?
//!                                       budget = 1 + sem.try_consume(free - 2)
//!                                       pop ≤ budget jobs → handler.start()
//!                                       re-arm semaphore wait (unless stopping)
//!                                     else
//!                                       handler.complete(user_data, res)
//!                                         → callback, or resubmit
//!                                     stopping && in_flight == 0 → break
//!                                   }
//!                                   cancel whatever is still queued
//! ```
//!
//! The loop is generic over `Handler`; files and database operations are
//! two handlers over the same loop.

pub mod completion;
pub mod db;
pub mod file;
pub mod shared;
pub mod worker;

pub use db::DbHandler;
pub use file::FileHandler;
pub use shared::{QueuedJob, WorkerShared};
pub use worker::{spawn_worker, Handler};
