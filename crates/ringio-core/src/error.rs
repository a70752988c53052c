//! ringio error types.
//!
//! Only construction can fail with an error value. Everything that happens
//! after a job is accepted is reported through its callback.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingioError {
    /// io_uring setup failed.
    RingSetup(i32),
    /// eventfd creation failed.
    EventFd(i32),
    /// Ring thread could not be spawned.
    Spawn(String),
    /// Configuration rejected by `validate()`.
    InvalidConfig(&'static str),
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for RingioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingSetup(e) => write!(f, "io_uring setup: errno {}", e),
            Self::EventFd(e) => write!(f, "eventfd: errno {}", e),
            Self::Spawn(msg) => write!(f, "failed to spawn ring thread: {}", msg),
            Self::InvalidConfig(why) => write!(f, "invalid config: {}", why),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for RingioError {}

impl From<std::io::Error> for RingioError {
    fn from(e: std::io::Error) -> Self {
        Self::Os(e.raw_os_error().unwrap_or(-1))
    }
}

pub type Result<T> = std::result::Result<T, RingioError>;
