//! Stack - kernel stacks and user stack regions
//!
//! Kernel stacks are built from pool frames with an unmapped guard page
//! below them; a canary in the lowest word catches overflows that skipped
//! the guard.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::memory::{FramePool, FrameRef, MemoryError, MemoryResult, PAGE_SIZE};

/// Default kernel stack size (16KB)
pub const DEFAULT_KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Stack guard page size (4KB)
pub const STACK_GUARD_SIZE: usize = 4096;

/// Kernel virtual window reserved for thread stacks
const KSTACK_AREA_BASE: u64 = 0xFFFF_C000_0000_0000;

const STACK_CANARY: u64 = 0x5354_4B5F_4755_4152;

static NEXT_KSTACK_SLOT: AtomicU64 = AtomicU64::new(0);

/// Per-thread kernel stack
pub struct KernelStack {
    frames: Vec<FrameRef>,
    base: u64,
    size: usize,
}

impl KernelStack {
    /// Allocate a stack of `size` bytes (page multiple)
    pub fn new(pool: &FramePool, size: usize) -> MemoryResult<Self> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(MemoryError::InvalidRange);
        }
        let pages = size / PAGE_SIZE;
        let mut frames = Vec::with_capacity(pages);
        for _ in 0..pages {
            frames.push(pool.alloc_zeroed()?);
        }
        frames[0].write(0, &STACK_CANARY.to_le_bytes());

        let slot = NEXT_KSTACK_SLOT.fetch_add(1, Ordering::Relaxed);
        let stride = (size + STACK_GUARD_SIZE) as u64;
        let base = KSTACK_AREA_BASE + slot * stride + STACK_GUARD_SIZE as u64;
        Ok(Self { frames, base, size })
    }

    /// Get stack base address (lowest mapped byte)
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Get stack top address (initial stack pointer)
    pub fn top(&self) -> u64 {
        self.base + self.size as u64
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Address lies in the guard page just below the stack
    pub fn is_guard_hit(&self, addr: u64) -> bool {
        addr < self.base && addr >= self.base - STACK_GUARD_SIZE as u64
    }

    /// Lowest word still holds the canary
    pub fn check_canary(&self) -> bool {
        let mut word = [0u8; 8];
        self.frames[0].read(0, &mut word);
        u64::from_le_bytes(word) == STACK_CANARY
    }

    pub fn page_count(&self) -> usize {
        self.frames.len()
    }
}

/// User stack carved out of the owning process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStack {
    pub base: u64,
    pub size: usize,
}

impl UserStack {
    pub fn top(&self) -> u64 {
        self.base + self.size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_layout() {
        let pool = FramePool::new(16);
        let a = KernelStack::new(&pool, DEFAULT_KERNEL_STACK_SIZE).unwrap();
        let b = KernelStack::new(&pool, DEFAULT_KERNEL_STACK_SIZE).unwrap();
        assert_eq!(a.page_count(), 4);
        assert_eq!(a.top() - a.base(), DEFAULT_KERNEL_STACK_SIZE as u64);
        assert!(a.check_canary());
        assert!(a.is_guard_hit(a.base() - 1));
        assert!(!a.is_guard_hit(a.base()));
        assert!(b.base() >= a.top() + STACK_GUARD_SIZE as u64 || a.base() >= b.top());
        assert_eq!(pool.allocated(), 8);
        drop(a);
        assert_eq!(pool.allocated(), 4);
    }

    #[test]
    fn test_canary_detects_smash() {
        let pool = FramePool::new(4);
        let stack = KernelStack::new(&pool, DEFAULT_KERNEL_STACK_SIZE).unwrap();
        stack.frames[0].write(0, &[0; 8]);
        assert!(!stack.check_canary());
    }

    #[test]
    fn test_stack_allocation_failure_releases_frames() {
        let pool = FramePool::new(3);
        assert!(KernelStack::new(&pool, DEFAULT_KERNEL_STACK_SIZE).is_err());
        assert_eq!(pool.allocated(), 0);
    }
}
