//! Waiting on a callback from a task or from a thread.
//!
//! A oneshot channel is the promise: the callback sends, the caller either
//! awaits the receiver (task context, only the task is suspended) or blocks
//! on it (thread context).

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;

/// True when called from inside a tokio runtime.
pub fn is_coroutine_context() -> bool {
    Handle::try_current().is_ok()
}

pub(crate) fn channel<T>() -> (oneshot::Sender<T>, oneshot::Receiver<T>) {
    oneshot::channel()
}

/// Await `rx`; `cancelled` stands in when the sender was dropped unsent.
pub(crate) async fn resolve<T>(rx: oneshot::Receiver<T>, cancelled: impl FnOnce() -> T) -> T {
    rx.await.unwrap_or_else(|_| cancelled())
}

/// Block the current OS thread on `rx`.
///
/// Inside a multi-thread runtime the worker hands its other tasks off first
/// (`block_in_place`). A current-thread runtime cannot do that, so the wait
/// moves to a scoped helper thread.
pub(crate) fn wait<T: Send>(rx: oneshot::Receiver<T>, cancelled: impl FnOnce() -> T) -> T {
    let got = match Handle::try_current() {
        Err(_) => rx.blocking_recv().ok(),
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => tokio::task::block_in_place(|| rx.blocking_recv().ok()),
            _ => std::thread::scope(|s| s.spawn(move || rx.blocking_recv().ok()).join())
                .ok()
                .flatten(),
        },
    };
    got.unwrap_or_else(cancelled)
}
