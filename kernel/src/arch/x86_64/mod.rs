//! x86_64 register file and context-switch routines

mod context;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod switch;

pub use context::{CpuContext, KERNEL_CS, KERNEL_SS, RFLAGS_IF, USER_CS, USER_SS};
