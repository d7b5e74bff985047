//! User memory access and ABI records
//!
//! Every pointer a syscall receives is resolved through the caller's
//! address space with user permissions, exactly as the CPU would. A bad
//! pointer fails the call with `BadAddress`; it never raises a signal.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::memory::AccessKind;
use crate::process::{ExitInfo, Process};
use crate::sched::{SchedClass, SchedParams};

/// Largest buffer a single call copies across the boundary
pub const MAX_USER_COPY: usize = 1 << 20;

/// `wait_process` result record
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct RawExitInfo {
    pub pid: u64,
    /// POSIX wait status word
    pub status: i32,
    /// Exit code, or 128 + signal
    pub code: i32,
}

impl From<ExitInfo> for RawExitInfo {
    fn from(info: ExitInfo) -> Self {
        Self { pid: info.pid.raw(), status: info.status.wait_status(), code: info.status.code() }
    }
}

/// Scheduling parameters as passed through user memory
///
/// `class`: 0 = normal, 1 = real-time, 2 = batch, 3 = idle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct RawSchedParams {
    pub class: u32,
    pub priority: u32,
    pub nice: i32,
    pub reserved: u32,
}

impl RawSchedParams {
    pub fn to_params(&self) -> KernelResult<SchedParams> {
        let class = match self.class {
            0 => SchedClass::Normal,
            1 => SchedClass::Realtime,
            2 => SchedClass::Batch,
            3 => SchedClass::Idle,
            _ => return Err(KernelError::InvalidArgument),
        };
        let priority = u8::try_from(self.priority).map_err(|_| KernelError::InvalidArgument)?;
        let nice = i8::try_from(self.nice).map_err(|_| KernelError::InvalidArgument)?;
        Ok(SchedParams { class, priority, nice })
    }
}

impl From<SchedParams> for RawSchedParams {
    fn from(params: SchedParams) -> Self {
        let class = match params.class {
            SchedClass::Normal => 0,
            SchedClass::Realtime => 1,
            SchedClass::Batch => 2,
            SchedClass::Idle => 3,
        };
        Self { class, priority: params.priority as u32, nice: params.nice as i32, reserved: 0 }
    }
}

impl Kernel {
    /// Copy `len` bytes in from the caller's memory
    pub fn copy_from_user(&self, process: &Process, addr: u64, len: usize) -> KernelResult<Vec<u8>> {
        if len > MAX_USER_COPY {
            return Err(KernelError::InvalidArgument);
        }
        let mut buf = vec![0u8; len];
        if len > 0 {
            process.space.lock().read(addr, &mut buf).map_err(KernelError::from)?;
        }
        Ok(buf)
    }

    /// Copy `data` out to the caller's memory
    pub fn copy_to_user(&self, process: &Process, addr: u64, data: &[u8]) -> KernelResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        process.space.lock().write(addr, data).map_err(KernelError::from)
    }

    /// Make `len` bytes at `addr` writable before a call consumes anything
    ///
    /// A later `copy_to_user` into the range then cannot fail, so a receive
    /// never loses what it dequeued to a bad buffer.
    pub fn prepare_user_write(&self, process: &Process, addr: u64, len: usize) -> KernelResult<()> {
        if len > MAX_USER_COPY {
            return Err(KernelError::InvalidArgument);
        }
        let result = process.space.lock().prefault(addr, len, AccessKind::Write);
        result.map_err(KernelError::from)
    }

    pub fn read_user<T: FromBytes>(&self, process: &Process, addr: u64) -> KernelResult<T> {
        let bytes = self.copy_from_user(process, addr, core::mem::size_of::<T>())?;
        T::read_from(bytes.as_slice()).ok_or(KernelError::BadAddress)
    }

    pub fn write_user<T: AsBytes>(&self, process: &Process, addr: u64, value: &T) -> KernelResult<()> {
        self.copy_to_user(process, addr, value.as_bytes())
    }

    /// UTF-8 name of `len` bytes
    pub(crate) fn user_str(&self, process: &Process, addr: u64, len: usize) -> KernelResult<String> {
        let bytes = self.copy_from_user(process, addr, len)?;
        String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument)
    }
}
