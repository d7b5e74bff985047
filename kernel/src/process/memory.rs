//! Process memory operations
//!
//! Thin wrappers that run address-space operations on behalf of a process
//! under its space lock.

use log::debug;

use super::{Pid, Process};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::memory::{AccessKind, AddressSpaceStats, Backing, Protection, RegionKind, PAGE_SIZE};

impl Kernel {
    fn user_process(&self, pid: Pid) -> KernelResult<alloc::sync::Arc<Process>> {
        let process = self.process(pid)?;
        if process.is_kernel() || process.has_exited() {
            return Err(KernelError::NoSuchProcess);
        }
        Ok(process)
    }

    /// `mmap`: anonymous private memory, at `addr` or wherever it fits
    ///
    /// `size` is rounded up to whole pages. Pages are zero-filled on first
    /// touch.
    pub fn mmap(&self, pid: Pid, addr: Option<u64>, size: usize, prot: Protection) -> KernelResult<u64> {
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let process = self.user_process(pid)?;
        let size = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mut space = process.space.lock();
        let base = match addr {
            Some(addr) => space.map(addr, size, prot, RegionKind::Mmap, Backing::Anonymous)?,
            None => space.map_anywhere(size, prot, RegionKind::Mmap, Backing::Anonymous)?,
        };
        debug!("{} mapped {:#x}+{:#x} {:?}", pid, base, size, prot);
        Ok(base)
    }

    /// `munmap`: drop the region starting at `addr`
    pub fn munmap(&self, pid: Pid, addr: u64) -> KernelResult<()> {
        let process = self.user_process(pid)?;
        let mut space = process.space.lock();
        match space.region_at(addr) {
            Some(region) if region.start == addr && region.kind != RegionKind::Stack => {}
            Some(_) => return Err(KernelError::InvalidArgument),
            None => return Err(KernelError::BadAddress),
        }
        space.unmap(addr)?;
        Ok(())
    }

    /// Evict the page at `addr` to the swap device
    pub fn swap_out_page(&self, pid: Pid, addr: u64) -> KernelResult<()> {
        let process = self.user_process(pid)?;
        process.space.lock().swap_out(addr)?;
        Ok(())
    }

    /// Whether the page at `addr` currently lives in swap
    pub fn is_swapped(&self, pid: Pid, addr: u64) -> KernelResult<bool> {
        Ok(self.process(pid)?.space.lock().is_swapped(addr))
    }

    /// Physical frame number backing `addr`, if resident
    pub fn resident_frame(&self, pid: Pid, addr: u64) -> KernelResult<Option<u64>> {
        Ok(self.process(pid)?.space.lock().frame_at(addr).map(|frame| frame.number()))
    }

    /// Touch `addr` as the CPU would, without raising a signal
    pub fn touch(&self, pid: Pid, addr: u64, access: AccessKind) -> KernelResult<()> {
        let process = self.user_process(pid)?;
        let result = process.space.lock().handle_fault(addr, access);
        result.map_err(KernelError::from)
    }

    pub fn memory_stats(&self, pid: Pid) -> KernelResult<AddressSpaceStats> {
        Ok(self.process(pid)?.space.lock().stats())
    }
}
