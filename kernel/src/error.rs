//! Kernel Error Handling
//!
//! One error taxonomy for every core operation, with POSIX errno mapping for
//! the syscall boundary and recovery hints for the log.

use core::fmt;

/// Errors surfaced by process, thread, scheduling, signal and IPC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelError {
    // ═══════════════════════════════════════════════════════════════
    // Argument Errors
    // ═══════════════════════════════════════════════════════════════

    /// Malformed argument (bad size, alignment, priority, mask...)
    InvalidArgument,

    /// Signal number outside 1..MAX_SIGNALS or not allowed for the operation
    InvalidSignal,

    /// User pointer does not reference accessible memory
    BadAddress,

    // ═══════════════════════════════════════════════════════════════
    // Resource Errors
    // ═══════════════════════════════════════════════════════════════

    /// Physical frames or kernel records exhausted
    NoMemory,

    /// A per-process resource limit would be exceeded
    LimitExceeded,

    /// Object is in use and cannot be changed now
    Busy,

    /// Named object already exists
    AlreadyExists,

    // ═══════════════════════════════════════════════════════════════
    // Lookup Errors
    // ═══════════════════════════════════════════════════════════════

    /// Process id is stale or was never allocated
    NoSuchProcess,

    /// Thread id is stale or was never allocated
    NoSuchThread,

    /// IPC handle or name does not resolve
    NoSuchObject,

    /// Wait found no child matching the selector
    NoChild,

    /// Caller lacks the credentials for the operation
    PermissionDenied,

    // ═══════════════════════════════════════════════════════════════
    // Blocking Errors
    // ═══════════════════════════════════════════════════════════════

    /// Non-blocking attempt could not complete
    WouldBlock,

    /// Timed wait reached its deadline
    Timeout,

    /// Wait was broken by a deliverable signal
    Interrupted,

    // ═══════════════════════════════════════════════════════════════
    // Object Errors
    // ═══════════════════════════════════════════════════════════════

    /// Backing store or swap device failed
    Io,

    /// Message larger than the queue's maximum message size
    MessageTooBig,

    /// Write to a pipe with no readers left
    BrokenPipe,
}

/// Result alias for core operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidArgument => "invalid argument",
            Self::InvalidSignal => "invalid signal number",
            Self::BadAddress => "bad user address",
            Self::NoMemory => "out of memory",
            Self::LimitExceeded => "resource limit exceeded",
            Self::Busy => "resource busy",
            Self::AlreadyExists => "object already exists",
            Self::NoSuchProcess => "no such process",
            Self::NoSuchThread => "no such thread",
            Self::NoSuchObject => "no such object",
            Self::NoChild => "no child process",
            Self::PermissionDenied => "permission denied",
            Self::WouldBlock => "operation would block",
            Self::Timeout => "timed out",
            Self::Interrupted => "interrupted by signal",
            Self::Io => "I/O error",
            Self::MessageTooBig => "message too big",
            Self::BrokenPipe => "broken pipe",
        };
        f.write_str(text)
    }
}

impl KernelError {
    /// Negative POSIX errno returned to user space
    pub const fn errno(self) -> i64 {
        let code = match self {
            Self::PermissionDenied => 1, // EPERM
            Self::NoSuchObject => 2,     // ENOENT
            Self::NoSuchProcess => 3,    // ESRCH
            Self::Interrupted => 4,      // EINTR
            Self::Io => 5,               // EIO
            Self::NoChild => 10,         // ECHILD
            Self::WouldBlock => 11,      // EAGAIN
            Self::NoMemory => 12,        // ENOMEM
            Self::BadAddress => 14,      // EFAULT
            Self::Busy => 16,            // EBUSY
            Self::AlreadyExists => 17,   // EEXIST
            Self::InvalidArgument | Self::InvalidSignal => 22, // EINVAL
            Self::BrokenPipe => 32,      // EPIPE
            Self::MessageTooBig => 90,   // EMSGSIZE
            Self::Timeout => 110,        // ETIMEDOUT
            Self::LimitExceeded => 122,  // EDQUOT
            Self::NoSuchThread => 3,     // ESRCH
        };
        -code
    }

    /// Map a negative errno back to an error (lossy for shared codes)
    pub const fn from_errno(errno: i64) -> Option<Self> {
        Some(match -errno {
            1 => Self::PermissionDenied,
            2 => Self::NoSuchObject,
            3 => Self::NoSuchProcess,
            4 => Self::Interrupted,
            5 => Self::Io,
            10 => Self::NoChild,
            11 => Self::WouldBlock,
            12 => Self::NoMemory,
            14 => Self::BadAddress,
            16 => Self::Busy,
            17 => Self::AlreadyExists,
            22 => Self::InvalidArgument,
            32 => Self::BrokenPipe,
            90 => Self::MessageTooBig,
            110 => Self::Timeout,
            122 => Self::LimitExceeded,
            _ => return None,
        })
    }

    /// Get recovery hint for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::NoMemory => "Free memory or lower the frame budget consumers",
            Self::LimitExceeded => "Raise the process resource limit or release resources",
            Self::WouldBlock => "Retry later or use a blocking call",
            Self::Timeout => "Extend the deadline or check the peer",
            Self::Interrupted => "Restart the call after the signal handler returns",
            Self::BrokenPipe => "The reading end was closed",
            Self::PermissionDenied => "Check the caller's effective uid and capabilities",
            Self::NoSuchProcess | Self::NoSuchThread => "The target may have already exited",
            _ => "Check the call arguments",
        }
    }

    /// Is this an expected outcome rather than a fault worth logging?
    pub fn should_log(&self) -> bool {
        !matches!(
            self,
            Self::WouldBlock | Self::Timeout | Self::Interrupted | Self::NoChild
        )
    }
}

/// Log an error with its hint (when worth logging) and evaluate to it
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let err: $crate::error::KernelError = $err;
        if err.should_log() {
            log::warn!("{} ({})", err, err.recovery_hint());
        }
        err
    }};
    ($err:expr, $($arg:tt)*) => {{
        let err: $crate::error::KernelError = $err;
        if err.should_log() {
            log::warn!("{}: {} ({})", format_args!($($arg)*), err, err.recovery_hint());
        }
        err
    }};
}

/// Assert a core invariant; a violation is a kernel bug and halts
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            log::error!("[SCHED CRITICAL] Invariant violated: {}", format_args!($($arg)*));
            panic!("[SCHED CRITICAL] Invariant violated: {}", format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_roundtrip() {
        for err in [
            KernelError::PermissionDenied,
            KernelError::WouldBlock,
            KernelError::Timeout,
            KernelError::Interrupted,
            KernelError::MessageTooBig,
            KernelError::BrokenPipe,
            KernelError::LimitExceeded,
        ] {
            assert!(err.errno() < 0);
            assert_eq!(KernelError::from_errno(err.errno()), Some(err));
        }
    }

    #[test]
    fn test_invalid_signal_maps_to_einval() {
        assert_eq!(KernelError::InvalidSignal.errno(), -22);
        assert_eq!(KernelError::from_errno(-22), Some(KernelError::InvalidArgument));
    }

    #[test]
    fn test_expected_errors_are_quiet() {
        assert!(!KernelError::WouldBlock.should_log());
        assert!(KernelError::NoMemory.should_log());
    }

    #[test]
    #[should_panic(expected = "Invariant violated")]
    fn test_sched_assert_panics() {
        sched_assert!(1 + 1 == 3, "arithmetic broke: {}", 2);
    }
}
