//! State - Thread state machine
//!
//! Manages thread lifecycle and state transitions

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadState {
    /// Created, never enqueued
    New = 0,

    /// In exactly one run-queue
    Ready = 1,

    /// In its CPU's current slot
    Running = 2,

    /// Sleeping on a wait queue (IPC, child exit, generic sleep_on)
    Waiting = 3,

    /// Sleeping on the timer only
    Blocked = 4,

    /// Stopped by a stop signal
    Suspended = 5,

    /// Exited; never runs again
    Terminated = 6,
}

impl ThreadState {
    /// Convert from the atomic representation
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::New),
            1 => Some(Self::Ready),
            2 => Some(Self::Running),
            3 => Some(Self::Waiting),
            4 => Some(Self::Blocked),
            5 => Some(Self::Suspended),
            6 => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Check if state is schedulable
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Sleeping in a way a signal can break
    pub fn is_sleeping(self) -> bool {
        matches!(self, Self::Waiting | Self::Blocked)
    }

    /// Counts toward the process's live threads
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Waiting => "Waiting",
            Self::Blocked => "Blocked",
            Self::Suspended => "Suspended",
            Self::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Atomic thread state
pub struct AtomicThreadState {
    state: AtomicU8,
}

impl AtomicThreadState {
    /// Create new atomic state
    pub const fn new(state: ThreadState) -> Self {
        Self { state: AtomicU8::new(state as u8) }
    }

    /// Load current state
    pub fn load(&self) -> ThreadState {
        let value = self.state.load(Ordering::Acquire);
        ThreadState::from_u8(value).unwrap_or(ThreadState::Terminated)
    }

    /// Compare and exchange state
    pub fn compare_exchange(
        &self,
        current: ThreadState,
        new: ThreadState,
    ) -> Result<ThreadState, ThreadState> {
        match self.state.compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire) {
            Ok(old) => Ok(ThreadState::from_u8(old).unwrap_or(current)),
            Err(actual) => Err(ThreadState::from_u8(actual).unwrap_or(ThreadState::Terminated)),
        }
    }

    /// Move from any state in `from` to `to`, validating the edge
    ///
    /// Returns the state that was replaced, or the state that blocked the move.
    pub fn transition(&self, from: &[ThreadState], to: ThreadState) -> Result<ThreadState, ThreadState> {
        let mut current = self.load();
        loop {
            if !from.contains(&current) || !validate_transition(current, to) {
                return Err(current);
            }
            match self.compare_exchange(current, to) {
                Ok(old) => return Ok(old),
                Err(actual) => current = actual,
            }
        }
    }

    /// Terminate from whatever state; returns the previous state
    pub fn terminate(&self) -> ThreadState {
        let old = self.state.swap(ThreadState::Terminated as u8, Ordering::AcqRel);
        ThreadState::from_u8(old).unwrap_or(ThreadState::Terminated)
    }
}

/// Validate state transition
pub fn validate_transition(from: ThreadState, to: ThreadState) -> bool {
    use ThreadState::*;

    match (from, to) {
        // New -> Ready (first enqueue)
        (New, Ready) => true,

        // Ready -> Running (selected)
        (Ready, Running) => true,

        // Running -> Ready (preemption, yield)
        (Running, Ready) => true,

        // Running/Ready -> Waiting/Blocked (sleep_on, IPC wait, sleep)
        (Running | Ready, Waiting | Blocked) => true,

        // Waiting/Blocked -> Ready (wakeup)
        (Waiting | Blocked, Ready) => true,

        // Stop signal
        (Ready | Running | Waiting | Blocked, Suspended) => true,

        // Continue
        (Suspended, Ready) => true,

        // Exit or forced termination
        (_, Terminated) => from != Terminated,

        // All other transitions invalid
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_edges() {
        assert!(validate_transition(ThreadState::New, ThreadState::Ready));
        assert!(validate_transition(ThreadState::Running, ThreadState::Waiting));
        assert!(validate_transition(ThreadState::Waiting, ThreadState::Ready));
        assert!(!validate_transition(ThreadState::Waiting, ThreadState::Running));
        assert!(!validate_transition(ThreadState::New, ThreadState::Running));
        assert!(!validate_transition(ThreadState::Terminated, ThreadState::Terminated));
        assert!(!validate_transition(ThreadState::Terminated, ThreadState::Ready));
    }

    #[test]
    fn test_transition_from_set() {
        let state = AtomicThreadState::new(ThreadState::Blocked);
        assert_eq!(
            state.transition(&[ThreadState::Waiting, ThreadState::Blocked], ThreadState::Ready),
            Ok(ThreadState::Blocked)
        );
        assert_eq!(
            state.transition(&[ThreadState::Waiting], ThreadState::Ready),
            Err(ThreadState::Ready)
        );
        assert_eq!(state.terminate(), ThreadState::Ready);
        assert_eq!(state.load(), ThreadState::Terminated);
    }
}
