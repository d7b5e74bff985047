//! Process module
//!
//! Process records, credentials, limits and the lifecycle operations
//! (create, spawn, exit, wait, fork, exec).

mod credentials;
mod lifecycle;
mod limits;
mod memory;
mod process;
mod stats;

use core::fmt;

use crate::arena::Handle;

pub use credentials::{Capabilities, Credentials};
pub use lifecycle::{ExecImage, ExecSegment, WaitSelector};
pub use limits::{ResourceLimits, ResourceUsage};
pub use process::{ExitInfo, ExitStatus, Process, ProcessState};
pub(crate) use process::ProcessInner;
pub use stats::ProcessStats;

/// Process id (generational, never 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(Handle);

impl Pid {
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

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}
