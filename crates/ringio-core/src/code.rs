//! Result codes delivered through file callbacks.
//!
//! A callback result is either a non-negative byte count or a negative
//! errno. Kernel errors pass through verbatim; the two codes below are
//! produced by ringio itself before a job ever reaches the ring.

/// The handle was closed or never opened. Detected at enqueue time.
pub const BAD_HANDLE: i32 = -libc::EBADF;

/// The job was not run: queue overflow, ring overflow, or shutdown.
pub const CANCELED: i32 = -libc::ECANCELED;

/// True when `result` is an error code rather than a byte count.
#[inline]
pub fn is_error(result: i32) -> bool {
    result < 0
}

/// Convert a callback result into `io::Result<usize>`.
#[inline]
pub fn to_io_result(result: i32) -> std::io::Result<usize> {
    if result < 0 {
        Err(std::io::Error::from_raw_os_error(-result))
    } else {
        Ok(result as usize)
    }
}
