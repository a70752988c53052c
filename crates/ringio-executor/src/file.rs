//! File jobs on the ring.

use ringio_core::code;
use ringio_core::job::FileJob;
use ringio_module::Ring;

use crate::completion::{from_user_data, into_user_data, FileRecord};
use crate::worker::{guarded, Handler};

/// Positional reads and writes. One SQE per job, no resubmission: a short
/// transfer is reported as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileHandler;

impl Handler for FileHandler {
    type Job = FileJob;

    fn start(&mut self, ring: &mut Ring, job: FileJob) -> bool {
        let (fd, buf, offset, callback, is_read) = match job {
            FileJob::Read { fd, buf, offset, callback } => (fd, buf, offset, callback, true),
            FileJob::Write { fd, buf, offset, callback } => (fd, buf, offset, callback, false),
            FileJob::Close => return false,
        };

        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let mut record = Box::new(FileRecord { buf, callback, is_read });
        let ptr = record.buf.as_mut_ptr();
        // -1 (current position) maps to u64::MAX.
        let offset = offset as u64;
        let user_data = into_user_data(record);

        // Safety: the buffer lives in the leaked record until `complete`.
        let queued = unsafe {
            if is_read {
                ring.submit_read(fd, ptr, len, offset, user_data)
            } else {
                ring.submit_write(fd, ptr, len, offset, user_data)
            }
        };
        if !queued {
            tracing::warn!(fd, "submission queue full, cancelling file job");
            // Safety: the SQE was not queued, so nothing else holds it.
            let record: Box<FileRecord> = unsafe { from_user_data(user_data) };
            deliver(record, code::CANCELED);
        }
        queued
    }

    unsafe fn complete(&mut self, _ring: &mut Ring, user_data: u64, result: i32) -> bool {
        let mut record: Box<FileRecord> = from_user_data(user_data);
        if record.is_read && result >= 0 {
            record.buf.truncate(result as usize);
        }
        deliver(record, result);
        false
    }
}

fn deliver(record: Box<FileRecord>, result: i32) {
    let FileRecord { buf, callback, .. } = *record;
    guarded("file", move || callback(result, buf));
}
