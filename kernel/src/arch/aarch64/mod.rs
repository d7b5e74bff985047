//! AArch64 register file
//!
//! x0..x30, SP_EL0, ELR_EL1 and SPSR_EL1 as saved by the exception entry
//! path. The switch routine itself belongs to the AArch64 boot image.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// SPSR value for EL0t with IRQs unmasked
pub const SPSR_EL0T: u64 = 0b0000;
/// SPSR value for EL1h with IRQs unmasked
pub const SPSR_EL1H: u64 = 0b0101;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct CpuContext {
    pub x: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
    pub tpidr: u64,
}

impl CpuContext {
    pub fn new_user(entry: u64, stack_top: u64, arg: u64) -> Self {
        let mut ctx = Self { pc: entry, sp: stack_top, pstate: SPSR_EL0T, ..Self::default() };
        ctx.x[0] = arg;
        ctx
    }

    pub fn new_kernel(entry: u64, stack_top: u64, arg: u64) -> Self {
        let mut ctx = Self { pc: entry, sp: stack_top, pstate: SPSR_EL1H, ..Self::default() };
        ctx.x[0] = arg;
        ctx
    }

    pub fn is_user(&self) -> bool {
        self.pstate & 0b1111 == SPSR_EL0T
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.pc
    }

    pub fn set_instruction_pointer(&mut self, ip: u64) {
        self.pc = ip;
    }

    pub fn stack_pointer(&self) -> u64 {
        self.sp
    }

    pub fn set_stack_pointer(&mut self, sp: u64) {
        self.sp = sp;
    }

    pub fn return_value(&self) -> u64 {
        self.x[0]
    }

    pub fn set_return_value(&mut self, value: u64) {
        self.x[0] = value;
    }

    /// Redirect this context into a signal handler
    ///
    /// The return address travels in the link register, so nothing has to
    /// be stored on the user stack.
    pub fn prepare_signal_handler(
        &mut self,
        entry: u64,
        sp: u64,
        signo: u64,
        info: u64,
        uctx: u64,
        restorer: u64,
    ) -> Option<(u64, u64)> {
        self.pc = entry;
        self.sp = sp;
        self.x[0] = signo;
        self.x[1] = info;
        self.x[2] = uctx;
        self.x[30] = restorer;
        None
    }
}
