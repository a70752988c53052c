//! Database jobs on the ring.
//!
//! A job becomes a `DbOperation` from the engine; the handler resumes it
//! after every transfer it asks for, until it produces a reply.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ringio_core::db::{DbEngine, DbReply, DbStatus, Finished, IoRequest, IoSlot, Step};
use ringio_core::job::DbJob;
use ringio_module::Ring;

use crate::completion::{from_user_data, into_user_data, DbRecord};
use crate::worker::{guarded, Handler};

pub struct DbHandler<E: DbEngine> {
    engine: Arc<E>,
}

impl<E: DbEngine> DbHandler<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// Resume the operation in `record` with `last`. True when it asked for
    /// another transfer and that transfer is now queued.
    fn advance(&mut self, ring: &mut Ring, mut record: Box<DbRecord>, last: Option<i32>) -> bool {
        let mut slot = IoSlot::new();
        let step = catch_unwind(AssertUnwindSafe(|| record.op.resume(&mut slot, last)));

        let reply = match step {
            Ok(Step::Ready(reply)) => reply,
            Ok(Step::Pending) => match slot.take() {
                Some(request) => {
                    let user_data = into_user_data(record);
                    // Safety: the operation owns the buffer and lives in the
                    // leaked record until the completion comes back.
                    if unsafe { submit(ring, request, user_data) } {
                        return true;
                    }
                    tracing::warn!("submission queue full, cancelling database operation");
                    // Safety: not queued, so this is the only owner.
                    record = unsafe { from_user_data(user_data) };
                    DbReply::cancelled()
                }
                None => {
                    tracing::error!("database operation pending without a transfer");
                    DbReply::Status(DbStatus::Other("operation stalled".into()))
                }
            },
            Err(_) => {
                tracing::error!("database operation panicked");
                DbReply::Status(DbStatus::Other("operation panicked".into()))
            }
        };

        let DbRecord { callback, .. } = *record;
        guarded("db", move || callback(reply));
        false
    }
}

impl<E: DbEngine> Handler for DbHandler<E> {
    type Job = DbJob<E::Family>;

    fn start(&mut self, ring: &mut Ring, job: Self::Job) -> bool {
        let DbJob::Op { family, request, callback } = job else {
            return false;
        };

        // The family may have been dropped after the job was accepted.
        if !self.engine.is_open(&family) {
            guarded("db", move || callback(DbReply::Status(DbStatus::InvalidHandle)));
            return false;
        }

        let kind = request.kind();
        let engine = &self.engine;
        let op = match catch_unwind(AssertUnwindSafe(|| engine.start(&family, request))) {
            Ok(op) => op,
            Err(_) => {
                tracing::error!(kind, "engine panicked starting operation");
                Finished::new(DbReply::Status(DbStatus::Other("engine panicked".into())))
            }
        };
        self.advance(ring, Box::new(DbRecord { op, callback }), None)
    }

    unsafe fn complete(&mut self, ring: &mut Ring, user_data: u64, result: i32) -> bool {
        let record: Box<DbRecord> = from_user_data(user_data);
        self.advance(ring, record, Some(result))
    }
}

unsafe fn submit(ring: &mut Ring, request: IoRequest, user_data: u64) -> bool {
    match request {
        IoRequest::Read { fd, buf, len, offset } => ring.submit_read(fd, buf, len, offset, user_data),
        IoRequest::Write { fd, buf, len, offset } => {
            ring.submit_write(fd, buf, len, offset, user_data)
        }
    }
}
