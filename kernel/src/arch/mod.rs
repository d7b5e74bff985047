//! Architecture boundary
//!
//! The register file of each supported architecture and the `Platform`
//! trait through which the core reaches the timer, the interrupt
//! controller, the MMU and the context-switch routine.

pub mod aarch64;
pub mod hosted;
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub use self::aarch64::CpuContext;
#[cfg(not(target_arch = "aarch64"))]
pub use self::x86_64::CpuContext;

/// Logical CPU number, dense in 0..cpu_count
pub type CpuId = usize;

/// Inter-processor interrupt vectors used by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IpiVector {
    /// Drain the request mailbox and re-evaluate the running thread
    Reschedule = 0xF0,
    /// Stop the CPU (panic or shutdown)
    Halt = 0xF1,
}

/// Physical root of a page-table tree (CR3 / TTBR0 value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageTableRoot(pub u64);

impl PageTableRoot {
    /// Kernel-only tables shared by every kernel thread
    pub const KERNEL: Self = Self(0);
}

/// Hardware services the core depends on
///
/// Implemented by the boot image for real hardware and by
/// [`hosted::HostedPlatform`] for host execution.
pub trait Platform: Send + Sync {
    /// Monotonic nanoseconds since boot
    fn now_ns(&self) -> u64;

    /// CPU executing the caller
    fn current_cpu(&self) -> CpuId;

    /// CPUs online
    fn cpu_count(&self) -> usize;

    /// Post an IPI to `cpu`
    fn send_ipi(&self, cpu: CpuId, vector: IpiVector);

    /// Load `root` as the current CPU's user page tables
    fn activate_address_space(&self, root: PageTableRoot);

    /// Save the running register file into `prev` and resume `next`
    ///
    /// Returns when some later switch resumes `prev`.
    ///
    /// # Safety
    /// Both pointers must reference live contexts owned by threads that stay
    /// allocated across the switch; no lock may be held by the caller.
    unsafe fn switch_context(&self, prev: *mut CpuContext, next: *const CpuContext);

    /// Resume `next` without saving the current register file
    ///
    /// Used at CPU start and when the outgoing thread is dead. Does not
    /// return on hardware.
    ///
    /// # Safety
    /// Same as [`Platform::switch_context`] for `next`.
    unsafe fn restore_context(&self, next: *const CpuContext);
}
