//! Wait/wakeup
//!
//! Blocking operations are restartable: when an operation has to wait it
//! parks the calling thread on a wait queue and returns
//! [`Progress::Blocked`]. Once the thread runs again the caller re-issues
//! the same operation, which first consumes the outcome of the wait
//! (woken, timed out, interrupted) and then either completes or parks again.

mod wait;
mod wait_queue;

pub use wait::{WaitLink, WaitReason, WakeResult, SLEEP_CHANNEL};
pub use wait_queue::WaitQueue;
pub(crate) use wait_queue::Waiter;

/// Outcome of a possibly-blocking operation
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    /// Completed with a value
    Done(T),
    /// The caller was parked; re-issue the operation once it runs again
    Blocked,
}

impl<T> Progress<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Progress::Blocked)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Progress::Done(value) => Some(value),
            Progress::Blocked => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Done(value) => Progress::Done(f(value)),
            Progress::Blocked => Progress::Blocked,
        }
    }
}
