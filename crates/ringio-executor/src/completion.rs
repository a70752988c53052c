//! Completion records.
//!
//! Every SQE the ring thread submits carries `user_data`: either
//! `SEMAPHORE_TOKEN`, or the address of a boxed record that owns the
//! transfer buffer and the callback. The box is leaked at submission and
//! reclaimed exactly once, when its CQE comes back.

use ringio_core::db::DbOperation;
use ringio_core::job::{DbCallback, FileCallback};

/// `user_data` of the armed semaphore read. Heap addresses never reach it.
pub const SEMAPHORE_TOKEN: u64 = u64::MAX;

pub struct FileRecord {
    pub buf: Vec<u8>,
    pub callback: FileCallback,
    pub is_read: bool,
}

pub struct DbRecord {
    pub op: Box<dyn DbOperation>,
    pub callback: DbCallback,
}

/// Leak `record` into a `user_data` value.
pub fn into_user_data<T>(record: Box<T>) -> u64 {
    Box::into_raw(record) as u64
}

/// Reclaim a record leaked by `into_user_data`.
///
/// # Safety
/// `user_data` must come from `into_user_data::<T>` and must not have been
/// reclaimed before.
pub unsafe fn from_user_data<T>(user_data: u64) -> Box<T> {
    Box::from_raw(user_data as *mut T)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_data_round_trip() {
        let rec = Box::new(FileRecord {
            buf: vec![1, 2, 3],
            callback: Box::new(|_, _| {}),
            is_read: true,
        });
        let ud = into_user_data(rec);
        assert_ne!(ud, SEMAPHORE_TOKEN);
        let rec: Box<FileRecord> = unsafe { from_user_data(ud) };
        assert_eq!(rec.buf, vec![1, 2, 3]);
        assert!(rec.is_read);
    }
}
