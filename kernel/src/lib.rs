//! Exo-OS core - processes, threads and scheduling
//!
//! The process/thread/scheduling core of the kernel: per-CPU run-queues,
//! CPU contexts, thread and process objects, the multi-level feedback
//! scheduler, POSIX-style signals, the process address-space lifecycle and
//! the IPC primitives threads block on.
//!
//! Hardware is reached only through [`arch::Platform`]. The boot image
//! supplies the bare-metal implementation; [`arch::hosted::HostedPlatform`]
//! drives the same code deterministically on a development host.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[macro_use]
pub mod error;

pub mod arch;
pub mod arena;
pub mod config;
pub mod ipc;
pub mod kernel;
pub mod logger;
pub mod memory;
pub mod process;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod time;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
pub use process::{ExitStatus, Pid};
pub use sync::Progress;
pub use thread::{ThreadState, Tid};
pub use time::{Duration, Timeout, Timestamp};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
