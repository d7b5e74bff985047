//! Time - monotonic clock values, timeouts and the wait deadline queue

mod clock;
mod timer;

pub use clock::{Duration, Timestamp};
pub use timer::{TimerKey, TimerQueue};

/// How long a blocking operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until woken or interrupted
    Never,
    /// Do not wait at all: fail with `WouldBlock` instead
    Poll,
    /// Wait at most this long
    After(Duration),
}

impl Timeout {
    /// Absolute deadline for a wait starting at `now`
    pub fn deadline(self, now: Timestamp) -> Option<Timestamp> {
        match self {
            Timeout::Never | Timeout::Poll => None,
            Timeout::After(d) => Some(now + d),
        }
    }

    pub fn is_poll(self) -> bool {
        matches!(self, Timeout::Poll)
    }

    /// Syscall ABI encoding: 0 polls, `u64::MAX` waits forever, else nanoseconds
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            0 => Timeout::Poll,
            u64::MAX => Timeout::Never,
            ns => Timeout::After(Duration::from_ns(ns)),
        }
    }
}
