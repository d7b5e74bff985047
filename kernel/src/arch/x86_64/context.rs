//! CPU Context for x86_64
//!
//! Full general-purpose register file plus the interrupt-return frame. The
//! layout is shared with the switch routines in `switch.rs` and is copied
//! verbatim into user-stack signal frames.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const KERNEL_CS: u64 = 0x08;
pub const KERNEL_SS: u64 = 0x10;
pub const USER_SS: u64 = 0x1B;
pub const USER_CS: u64 = 0x23;

/// Interrupt enable flag plus the always-one reserved bit
pub const RFLAGS_IF: u64 = 0x202;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct CpuContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
    pub fs_base: u64,
}

impl CpuContext {
    /// Context that starts executing `entry` in user mode
    ///
    /// `arg` is passed in the first argument register.
    pub fn new_user(entry: u64, stack_top: u64, arg: u64) -> Self {
        Self {
            rip: entry,
            rsp: stack_top,
            rdi: arg,
            rflags: RFLAGS_IF,
            cs: USER_CS,
            ss: USER_SS,
            ..Self::default()
        }
    }

    /// Context that starts executing `entry` in kernel mode
    pub fn new_kernel(entry: u64, stack_top: u64, arg: u64) -> Self {
        Self {
            rip: entry,
            rsp: stack_top,
            rdi: arg,
            rflags: RFLAGS_IF,
            cs: KERNEL_CS,
            ss: KERNEL_SS,
            ..Self::default()
        }
    }

    pub fn is_user(&self) -> bool {
        self.cs & 3 == 3
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    pub fn set_instruction_pointer(&mut self, ip: u64) {
        self.rip = ip;
    }

    pub fn stack_pointer(&self) -> u64 {
        self.rsp
    }

    pub fn set_stack_pointer(&mut self, sp: u64) {
        self.rsp = sp;
    }

    pub fn return_value(&self) -> u64 {
        self.rax
    }

    /// Value the interrupted syscall returns when this context resumes
    pub fn set_return_value(&mut self, value: u64) {
        self.rax = value;
    }

    /// Redirect this context into a signal handler
    ///
    /// `sp` must be 16-byte aligned. The handler receives `(signo, info,
    /// uctx)` and returns to `restorer`. Returns the stack slot the caller
    /// must store (address, value) before the context resumes.
    pub fn prepare_signal_handler(
        &mut self,
        entry: u64,
        sp: u64,
        signo: u64,
        info: u64,
        uctx: u64,
        restorer: u64,
    ) -> Option<(u64, u64)> {
        let ret_slot = sp - 8;
        self.rip = entry;
        self.rsp = ret_slot;
        self.rdi = signo;
        self.rsi = info;
        self.rdx = uctx;
        Some((ret_slot, restorer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn test_switch_offsets_match_layout() {
        assert_eq!(offset_of!(CpuContext, rbx), 8);
        assert_eq!(offset_of!(CpuContext, rdi), 40);
        assert_eq!(offset_of!(CpuContext, rbp), 48);
        assert_eq!(offset_of!(CpuContext, rsp), 56);
        assert_eq!(offset_of!(CpuContext, r12), 96);
        assert_eq!(offset_of!(CpuContext, rip), 128);
        assert_eq!(offset_of!(CpuContext, rflags), 136);
        assert_eq!(size_of::<CpuContext>(), 21 * 8);
    }

    #[test]
    fn test_new_user_context() {
        let ctx = CpuContext::new_user(0x40_1000, 0x7fff_0000, 42);
        assert!(ctx.is_user());
        assert_eq!(ctx.instruction_pointer(), 0x40_1000);
        assert_eq!(ctx.stack_pointer(), 0x7fff_0000);
        assert_eq!(ctx.rdi, 42);
        assert_eq!(ctx.rflags & 0x200, 0x200);
        assert!(!CpuContext::new_kernel(0, 0, 0).is_user());
    }

    #[test]
    fn test_signal_handler_entry_alignment() {
        let mut ctx = CpuContext::new_user(0x1000, 0x8000, 0);
        let slot = ctx.prepare_signal_handler(0x2000, 0x7000, 10, 0x7100, 0x7200, 0x3000);
        assert_eq!(slot, Some((0x6ff8, 0x3000)));
        // SysV: (rsp + 8) is 16-byte aligned at function entry
        assert_eq!((ctx.rsp + 8) % 16, 0);
        assert_eq!((ctx.rdi, ctx.rsi, ctx.rdx), (10, 0x7100, 0x7200));
    }
}
