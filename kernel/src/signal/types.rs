//! Signal types and constants
//!
//! POSIX signal numbers and the 64-bit signal set

use crate::error::{KernelError, KernelResult};

/// Signal numbers (POSIX standard)
pub const SIGHUP: u32 = 1; // Hangup
pub const SIGINT: u32 = 2; // Interrupt (Ctrl+C)
pub const SIGQUIT: u32 = 3; // Quit (Ctrl+\)
pub const SIGILL: u32 = 4; // Illegal instruction
pub const SIGTRAP: u32 = 5; // Trace trap
pub const SIGABRT: u32 = 6; // Abort
pub const SIGBUS: u32 = 7; // Bus error
pub const SIGFPE: u32 = 8; // Floating point exception
pub const SIGKILL: u32 = 9; // Kill (uncatchable)
pub const SIGUSR1: u32 = 10; // User-defined 1
pub const SIGSEGV: u32 = 11; // Segmentation fault
pub const SIGUSR2: u32 = 12; // User-defined 2
pub const SIGPIPE: u32 = 13; // Broken pipe
pub const SIGALRM: u32 = 14; // Alarm clock
pub const SIGTERM: u32 = 15; // Termination
pub const SIGSTKFLT: u32 = 16; // Stack fault
pub const SIGCHLD: u32 = 17; // Child status changed
pub const SIGCONT: u32 = 18; // Continue
pub const SIGSTOP: u32 = 19; // Stop (uncatchable)
pub const SIGTSTP: u32 = 20; // Terminal stop
pub const SIGTTIN: u32 = 21; // Background read
pub const SIGTTOU: u32 = 22; // Background write
pub const SIGURG: u32 = 23; // Urgent socket data
pub const SIGXCPU: u32 = 24; // CPU time limit exceeded
pub const SIGXFSZ: u32 = 25; // File size limit exceeded
pub const SIGVTALRM: u32 = 26; // Virtual alarm
pub const SIGPROF: u32 = 27; // Profiling timer
pub const SIGWINCH: u32 = 28; // Window size change
pub const SIGIO: u32 = 29; // I/O possible
pub const SIGPWR: u32 = 30; // Power failure
pub const SIGSYS: u32 = 31; // Bad system call
pub const SIGRTMIN: u32 = 32; // First real-time signal
pub const SIGRTMAX: u32 = 63; // Last real-time signal

/// Signals are 1..MAX_SIGNALS
pub const MAX_SIGNALS: u32 = 64;

pub fn is_valid_signal(sig: u32) -> bool {
    sig >= 1 && sig < MAX_SIGNALS
}

pub fn check_signal(sig: u32) -> KernelResult<u32> {
    if is_valid_signal(sig) {
        Ok(sig)
    } else {
        Err(KernelError::InvalidSignal)
    }
}

/// Real-time signals queue instead of coalescing
pub fn is_realtime(sig: u32) -> bool {
    (SIGRTMIN..=SIGRTMAX).contains(&sig)
}

/// SIGKILL and SIGSTOP can be neither caught, ignored nor blocked
pub fn is_unblockable(sig: u32) -> bool {
    sig == SIGKILL || sig == SIGSTOP
}

/// Signal set (bitmap, bit `sig - 1`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct SigSet {
    bits: u64,
}

impl SigSet {
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// Set of a single signal
    pub fn of(sig: u32) -> Self {
        let mut set = Self::empty();
        set.add(sig);
        set
    }

    /// Set with SIGKILL and SIGSTOP
    pub fn unblockable() -> Self {
        let mut set = Self::of(SIGKILL);
        set.add(SIGSTOP);
        set
    }

    pub fn add(&mut self, sig: u32) {
        if is_valid_signal(sig) {
            self.bits |= 1 << (sig - 1);
        }
    }

    pub fn remove(&mut self, sig: u32) {
        if is_valid_signal(sig) {
            self.bits &= !(1 << (sig - 1));
        }
    }

    pub fn contains(&self, sig: u32) -> bool {
        is_valid_signal(sig) && (self.bits & (1 << (sig - 1))) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn union(self, other: Self) -> Self {
        Self { bits: self.bits | other.bits }
    }

    pub fn difference(self, other: Self) -> Self {
        Self { bits: self.bits & !other.bits }
    }

    /// Lowest-numbered member
    pub fn lowest(&self) -> Option<u32> {
        if self.bits == 0 {
            None
        } else {
            Some(self.bits.trailing_zeros() + 1)
        }
    }

    /// Members in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        let bits = self.bits;
        (1..MAX_SIGNALS).filter(move |sig| bits & (1 << (sig - 1)) != 0)
    }
}

/// sigprocmask how parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskHow {
    Block,
    Unblock,
    SetMask,
}

impl MaskHow {
    pub fn from_raw(raw: u64) -> KernelResult<Self> {
        match raw {
            0 => Ok(MaskHow::Block),
            1 => Ok(MaskHow::Unblock),
            2 => Ok(MaskHow::SetMask),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_range() {
        assert!(!is_valid_signal(0));
        assert!(is_valid_signal(1));
        assert!(is_valid_signal(63));
        assert!(!is_valid_signal(64));
        assert_eq!(check_signal(64), Err(KernelError::InvalidSignal));
    }

    #[test]
    fn test_set_coalesces() {
        let mut set = SigSet::empty();
        set.add(SIGUSR1);
        set.add(SIGUSR1);
        set.add(SIGUSR1);
        assert_eq!(set.bits().count_ones(), 1);
        set.add(SIGINT);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![SIGINT, SIGUSR1]);
        assert_eq!(set.lowest(), Some(SIGINT));
        set.add(0);
        set.add(64);
        assert_eq!(set.bits().count_ones(), 2);
    }

    #[test]
    fn test_set_algebra() {
        let a = SigSet::of(SIGINT).union(SigSet::of(SIGTERM));
        let b = a.difference(SigSet::of(SIGINT));
        assert!(b.contains(SIGTERM));
        assert!(!b.contains(SIGINT));
        assert!(SigSet::unblockable().contains(SIGKILL));
    }
}
