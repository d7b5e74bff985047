//! Signal frame pushed on the user stack
//!
//! Holds everything `signal_return` needs to resume the interrupted code:
//! the full register file and the mask in force before the handler ran.

use core::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use super::info::RawSigInfo;
use crate::arch::CpuContext;

/// "EXOSIGFR"
pub const SIGNAL_FRAME_MAGIC: u64 = 0x4558_4F53_4947_4652;

/// Bytes below the interrupted stack pointer left untouched (x86-64 red zone)
pub const RED_ZONE: u64 = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct SignalFrame {
    pub magic: u64,
    pub signo: u64,
    pub saved_mask: u64,
    pub info: RawSigInfo,
    pub context: CpuContext,
}

impl SignalFrame {
    pub const SIZE: usize = size_of::<SignalFrame>();

    /// Offset of `info` from the frame start
    pub const INFO_OFFSET: u64 = 24;

    pub fn new(signo: u32, saved_mask: u64, info: RawSigInfo, context: CpuContext) -> Self {
        Self { magic: SIGNAL_FRAME_MAGIC, signo: signo as u64, saved_mask, info, context }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == SIGNAL_FRAME_MAGIC
    }

    /// 16-byte aligned frame address below `sp`
    pub fn place_below(sp: u64) -> Option<u64> {
        let addr = sp.checked_sub(RED_ZONE + Self::SIZE as u64)?;
        Some(addr & !0xF)
    }
}
