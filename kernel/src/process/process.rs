//! Process Structure
//!
//! A process owns an address space, a set of threads, credentials, limits,
//! a handler table and IPC handles. Mutable bookkeeping lives in
//! `ProcessInner` behind the per-process lock; the address space has its
//! own lock below it.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

use super::{Credentials, Pid, ResourceLimits, ResourceUsage};
use crate::ipc::HandleTable;
use crate::memory::AddressSpace;
use crate::sched::SchedParams;
use crate::signal::SignalTable;
use crate::sync::WaitQueue;
use crate::thread::Tid;
use crate::time::{Duration, Timestamp};

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Created, no thread yet
    Embryo,
    Running,
    /// Every thread held by a stop signal
    Stopped,
    /// Exit recorded, threads still terminating
    Exiting,
    /// No live threads; exit info kept until reaped
    Zombie,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Embryo => "embryo",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Exiting => "exiting",
            Self::Zombie => "zombie",
        };
        f.write_str(name)
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Exited(i32),
    Signaled { signal: u32, core: bool },
}

impl ExitStatus {
    /// Shell-style code: the exit code, or 128 + signal
    pub fn code(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled { signal, .. } => 128 + signal as i32,
        }
    }

    /// `wait` status word
    pub fn wait_status(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => (code & 0xff) << 8,
            ExitStatus::Signaled { signal, core } => signal as i32 | if core { 0x80 } else { 0 },
        }
    }
}

/// Result of a successful `process_wait`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub pid: Pid,
    pub status: ExitStatus,
}

/// State guarded by the per-process lock
pub(crate) struct ProcessInner {
    pub name: String,
    pub cmdline: Vec<String>,
    pub ppid: Option<Pid>,
    pub pgid: Pid,
    pub state: ProcessState,
    /// Live threads
    pub threads: Vec<Tid>,
    pub main: Option<Tid>,
    pub children: Vec<Pid>,
    pub creds: Credentials,
    pub limits: ResourceLimits,
    pub exit: Option<ExitStatus>,
    pub handles: HandleTable,
    pub signals: SignalTable,
    /// Parameters new threads start with
    pub default_params: SchedParams,
    /// Switch counters of threads that already terminated
    pub retired_voluntary: u64,
    pub retired_involuntary: u64,
}

pub struct Process {
    id: Pid,
    kernel: bool,
    pub(crate) inner: Mutex<ProcessInner>,
    pub(crate) space: Mutex<AddressSpace>,
    /// Waiters for any of this process's children to change state
    child_exit: WaitQueue,
    cpu_time_ns: AtomicU64,
    io_bytes: AtomicU64,
    xcpu_sent: AtomicBool,
    created_at: Timestamp,
}

impl Process {
    pub(crate) fn new(id: Pid, kernel: bool, inner: ProcessInner, space: AddressSpace, now: Timestamp) -> Self {
        Self {
            id,
            kernel,
            inner: Mutex::new(inner),
            space: Mutex::new(space),
            child_exit: WaitQueue::new(),
            cpu_time_ns: AtomicU64::new(0),
            io_bytes: AtomicU64::new(0),
            xcpu_sent: AtomicBool::new(false),
            created_at: now,
        }
    }

    pub fn id(&self) -> Pid {
        self.id
    }

    /// Owner of the idle threads; outside the user process tree
    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn cmdline(&self) -> Vec<String> {
        self.inner.lock().cmdline.clone()
    }

    pub fn ppid(&self) -> Option<Pid> {
        self.inner.lock().ppid
    }

    pub fn pgid(&self) -> Pid {
        self.inner.lock().pgid
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn has_exited(&self) -> bool {
        self.inner.lock().exit.is_some()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.lock().exit
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.lock().creds.clone()
    }

    pub fn limits(&self) -> ResourceLimits {
        self.inner.lock().limits.clone()
    }

    /// Replace the limits; lowering the memory limit does not unmap anything
    pub fn set_limits(&self, limits: ResourceLimits) {
        let max_memory = limits.max_memory;
        {
            let mut inner = self.inner.lock();
            inner.handles.set_limit(limits.max_files);
            inner.limits = limits;
        }
        self.space.lock().set_memory_limit(max_memory);
        self.xcpu_sent.store(false, Ordering::Release);
    }

    pub fn threads(&self) -> Vec<Tid> {
        self.inner.lock().threads.clone()
    }

    pub fn main_thread(&self) -> Option<Tid> {
        self.inner.lock().main
    }

    pub fn children(&self) -> Vec<Pid> {
        self.inner.lock().children.clone()
    }

    pub fn default_params(&self) -> SchedParams {
        self.inner.lock().default_params
    }

    pub fn child_exit(&self) -> &WaitQueue {
        &self.child_exit
    }

    pub fn cpu_time(&self) -> Duration {
        Duration::from_ns(self.cpu_time_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn add_cpu_time(&self, delta: Duration) {
        self.cpu_time_ns.fetch_add(delta.as_ns(), Ordering::Relaxed);
    }

    pub(crate) fn add_io(&self, bytes: usize) {
        self.io_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// True exactly once after CPU time passes `max_cpu_time`
    pub(crate) fn cpu_limit_crossed(&self) -> bool {
        let Some(limit) = self.inner.lock().limits.max_cpu_time else { return false };
        self.cpu_time() >= limit && !self.xcpu_sent.swap(true, Ordering::AcqRel)
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn usage(&self) -> ResourceUsage {
        let open_handles = self.inner.lock().handles.len();
        let space = self.space.lock();
        ResourceUsage {
            memory: space.mapped_bytes(),
            resident_pages: space.resident_pages(),
            cpu_time: self.cpu_time(),
            io_bytes: self.io_bytes.load(Ordering::Relaxed),
            open_handles,
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("id", &self.id).field("kernel", &self.kernel).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitStatus::Exited(42).code(), 42);
        assert_eq!(ExitStatus::Exited(42).wait_status(), 42 << 8);
        let killed = ExitStatus::Signaled { signal: 15, core: false };
        assert_eq!(killed.code(), 143);
        assert_eq!(killed.wait_status(), 15);
        assert_eq!(ExitStatus::Signaled { signal: 11, core: true }.wait_status(), 11 | 0x80);
    }
}
