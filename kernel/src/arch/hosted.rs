//! Hosted platform
//!
//! Deterministic stand-in for the hardware: a manually advanced clock, a
//! settable "current CPU", and recorders for IPIs, page-table loads and
//! context switches. Context switches do not transfer control; the caller
//! observes the scheduler's bookkeeping instead.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

use super::{CpuContext, CpuId, IpiVector, PageTableRoot, Platform};
use crate::time::Duration;

/// One recorded context switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRecord {
    pub cpu: CpuId,
    /// Whether the outgoing context was saved (false for a plain restore)
    pub saved: bool,
    pub next_ip: u64,
}

pub struct HostedPlatform {
    clock_ns: AtomicU64,
    current: AtomicUsize,
    cpus: usize,
    ipis: Mutex<Vec<(CpuId, IpiVector)>>,
    roots: Mutex<Vec<PageTableRoot>>,
    switches: Mutex<Vec<SwitchRecord>>,
}

impl HostedPlatform {
    pub fn new(cpus: usize) -> Self {
        Self {
            clock_ns: AtomicU64::new(0),
            current: AtomicUsize::new(0),
            cpus,
            ipis: Mutex::new(Vec::new()),
            roots: Mutex::new(vec![PageTableRoot::KERNEL; cpus]),
            switches: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock_ns.fetch_add(by.as_ns(), Ordering::SeqCst);
    }

    pub fn set_now(&self, ns: u64) {
        self.clock_ns.store(ns, Ordering::SeqCst);
    }

    /// Make subsequent calls behave as if executed on `cpu`
    pub fn set_current_cpu(&self, cpu: CpuId) {
        assert!(cpu < self.cpus, "cpu {} out of range", cpu);
        self.current.store(cpu, Ordering::SeqCst);
    }

    /// Drain the IPIs sent so far
    pub fn take_ipis(&self) -> Vec<(CpuId, IpiVector)> {
        core::mem::take(&mut *self.ipis.lock())
    }

    pub fn active_root(&self, cpu: CpuId) -> PageTableRoot {
        self.roots.lock()[cpu]
    }

    pub fn switch_count(&self) -> usize {
        self.switches.lock().len()
    }

    pub fn switches(&self) -> Vec<SwitchRecord> {
        self.switches.lock().clone()
    }
}

impl Platform for HostedPlatform {
    fn now_ns(&self) -> u64 {
        self.clock_ns.load(Ordering::SeqCst)
    }

    fn current_cpu(&self) -> CpuId {
        self.current.load(Ordering::SeqCst)
    }

    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn send_ipi(&self, cpu: CpuId, vector: IpiVector) {
        self.ipis.lock().push((cpu, vector));
    }

    fn activate_address_space(&self, root: PageTableRoot) {
        let cpu = self.current_cpu();
        self.roots.lock()[cpu] = root;
    }

    unsafe fn switch_context(&self, prev: *mut CpuContext, next: *const CpuContext) {
        let _ = prev;
        let next_ip = (*next).instruction_pointer();
        self.switches.lock().push(SwitchRecord { cpu: self.current_cpu(), saved: true, next_ip });
    }

    unsafe fn restore_context(&self, next: *const CpuContext) {
        let next_ip = (*next).instruction_pointer();
        self.switches.lock().push(SwitchRecord { cpu: self.current_cpu(), saved: false, next_ip });
    }
}
