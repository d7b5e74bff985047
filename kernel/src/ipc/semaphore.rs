//! Counting semaphore
//!
//! Waiters sleep on a wait queue ordered by scheduling rank. An interrupted
//! or timed-out wait never takes a count.

use spin::{Mutex, MutexGuard};

use crate::error::{KernelError, KernelResult};
use crate::sync::WaitQueue;

/// Largest value a semaphore may hold
pub const SEM_VALUE_MAX: u32 = i32::MAX as u32;

#[derive(Debug)]
pub struct SemState {
    value: u32,
}

impl SemState {
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Take one count if available
    pub fn try_acquire(&mut self) -> bool {
        if self.value == 0 {
            return false;
        }
        self.value -= 1;
        true
    }

    pub fn release(&mut self) -> KernelResult<()> {
        if self.value >= SEM_VALUE_MAX {
            return Err(KernelError::LimitExceeded);
        }
        self.value += 1;
        Ok(())
    }
}

pub struct Semaphore {
    id: u64,
    state: Mutex<SemState>,
    pub(crate) waiters: WaitQueue,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            id: super::next_object_id(),
            state: Mutex::new(SemState { value: initial.min(SEM_VALUE_MAX) }),
            waiters: WaitQueue::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn value(&self) -> u32 {
        self.state.lock().value
    }

    pub fn state(&self) -> MutexGuard<'_, SemState> {
        self.state.lock()
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let sem = Semaphore::new(1);
        assert!(sem.state().try_acquire());
        assert!(!sem.state().try_acquire());
        sem.state().release().unwrap();
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn test_release_overflow() {
        let sem = Semaphore::new(SEM_VALUE_MAX);
        assert_eq!(sem.state().release(), Err(KernelError::LimitExceeded));
        assert_eq!(sem.value(), SEM_VALUE_MAX);
    }
}
