//! Thread module

mod lifecycle;
pub mod stack;
pub mod state;
pub mod thread;

use core::fmt;

use crate::arena::Handle;

pub use stack::{KernelStack, UserStack, DEFAULT_KERNEL_STACK_SIZE, STACK_GUARD_SIZE};
pub use state::{validate_transition, AtomicThreadState, ThreadState};
pub use thread::{Thread, ThreadKind, ThreadSnapshot};

/// Thread id (generational, never 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(Handle);

impl Tid {
    pub(crate) const fn new(handle: Handle) -> Self {
        Self(handle)
    }

    pub(crate) const fn handle(self) -> Handle {
        self.0
    }

    pub const fn raw(self) -> u64 {
        self.0.raw()
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        Handle::from_raw(raw).map(Self)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
