//! Thread Structure
//!
//! A schedulable thread. Fields that other CPUs touch are individually
//! locked or atomic; see the crate-level lock order in `kernel.rs`.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use spin::Mutex;

use super::stack::{KernelStack, UserStack};
use super::state::{AtomicThreadState, ThreadState};
use super::Tid;
use crate::arch::{CpuContext, CpuId, PageTableRoot};
use crate::process::{Pid, Process};
use crate::sched::{SchedEntity, SchedParams};
use crate::signal::SignalState;
use crate::sync::WaitLink;
use crate::time::{Duration, Timestamp};

/// What the thread executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    /// User-mode code in a process address space
    User,
    /// Kernel-only code on the kernel tables
    Kernel,
    /// Per-CPU idle loop, never in a run-queue
    Idle,
}

pub struct Thread {
    id: Tid,
    name: String,
    pid: Pid,
    process: Weak<Process>,
    kind: ThreadKind,
    pub(crate) state: AtomicThreadState,
    /// Stop signal in effect; wakeups land in Suspended instead of Ready
    stopped: AtomicBool,
    pub(crate) context: Mutex<CpuContext>,
    kernel_stack: Mutex<Option<KernelStack>>,
    user_stack: Mutex<Option<UserStack>>,
    space_root: AtomicU64,
    pub(crate) sched: Mutex<SchedEntity>,
    pub(crate) signals: Mutex<SignalState>,
    pub(crate) wait: Mutex<WaitLink>,
    cpu_time_ns: AtomicU64,
    exit_code: AtomicI64,
    created_at: Timestamp,
}

/// Parts of a thread fixed at creation
pub(crate) struct ThreadSeed {
    pub name: String,
    pub pid: Pid,
    pub process: Weak<Process>,
    pub kind: ThreadKind,
    pub context: CpuContext,
    pub kernel_stack: KernelStack,
    pub user_stack: Option<UserStack>,
    pub space_root: PageTableRoot,
    pub sched: SchedEntity,
    pub signals: SignalState,
    pub now: Timestamp,
}

impl Thread {
    pub(crate) fn new(id: Tid, seed: ThreadSeed) -> Self {
        Self {
            id,
            name: seed.name,
            pid: seed.pid,
            process: seed.process,
            kind: seed.kind,
            state: AtomicThreadState::new(ThreadState::New),
            stopped: AtomicBool::new(false),
            context: Mutex::new(seed.context),
            kernel_stack: Mutex::new(Some(seed.kernel_stack)),
            user_stack: Mutex::new(seed.user_stack),
            space_root: AtomicU64::new(seed.space_root.0),
            sched: Mutex::new(seed.sched),
            signals: Mutex::new(seed.signals),
            wait: Mutex::new(WaitLink::new()),
            cpu_time_ns: AtomicU64::new(0),
            exit_code: AtomicI64::new(0),
            created_at: seed.now,
        }
    }

    pub fn id(&self) -> Tid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Owning process, unless it has already been reaped
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    pub fn is_idle(&self) -> bool {
        self.kind == ThreadKind::Idle
    }

    pub fn state(&self) -> ThreadState {
        self.state.load()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn set_stopped(&self, stopped: bool) {
        self.stopped.store(stopped, Ordering::Release);
    }

    pub fn context(&self) -> CpuContext {
        *self.context.lock()
    }

    pub(crate) fn set_context(&self, context: CpuContext) {
        *self.context.lock() = context;
    }

    /// Stable address of the saved register file for the switch routine
    pub(crate) fn context_ptr(&self) -> *mut CpuContext {
        let mut guard = self.context.lock();
        &mut *guard as *mut CpuContext
    }

    pub fn user_stack(&self) -> Option<UserStack> {
        *self.user_stack.lock()
    }

    pub(crate) fn set_user_stack(&self, stack: Option<UserStack>) {
        *self.user_stack.lock() = stack;
    }

    pub fn has_kernel_stack(&self) -> bool {
        self.kernel_stack.lock().is_some()
    }

    /// Kernel stack overflow detected by the canary
    pub fn kernel_stack_overflowed(&self) -> bool {
        self.kernel_stack.lock().as_ref().map_or(false, |stack| !stack.check_canary())
    }

    /// `addr` falls in the guard page under this thread's kernel stack
    pub fn kernel_stack_guard_hit(&self, addr: u64) -> bool {
        self.kernel_stack.lock().as_ref().map_or(false, |stack| stack.is_guard_hit(addr))
    }

    /// Lowest mapped byte of the kernel stack
    pub fn kernel_stack_base(&self) -> Option<u64> {
        self.kernel_stack.lock().as_ref().map(KernelStack::base)
    }

    /// Drop the kernel stack once the thread can no longer run on it
    pub(crate) fn release_kernel_stack(&self) -> Option<KernelStack> {
        self.kernel_stack.lock().take()
    }

    pub fn space_root(&self) -> PageTableRoot {
        PageTableRoot(self.space_root.load(Ordering::Acquire))
    }

    pub(crate) fn set_space_root(&self, root: PageTableRoot) {
        self.space_root.store(root.0, Ordering::Release);
    }

    pub fn cpu_time(&self) -> Duration {
        Duration::from_ns(self.cpu_time_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn add_cpu_time(&self, delta: Duration) {
        self.cpu_time_ns.fetch_add(delta.as_ns(), Ordering::Relaxed);
    }

    pub fn exit_code(&self) -> i64 {
        self.exit_code.load(Ordering::Relaxed)
    }

    pub(crate) fn set_exit_code(&self, code: i64) {
        self.exit_code.store(code, Ordering::Relaxed);
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn sched_params(&self) -> SchedParams {
        self.sched.lock().params
    }

    /// Rank used to order wait-queue wakeups and preemption
    pub fn rank(&self) -> u32 {
        self.sched.lock().rank
    }

    pub fn last_cpu(&self) -> Option<CpuId> {
        self.sched.lock().last_cpu
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        let sched = self.sched.lock();
        ThreadSnapshot {
            tid: self.id,
            pid: self.pid,
            name: self.name.clone(),
            state: self.state(),
            params: sched.params,
            cpu_time: self.cpu_time(),
            last_cpu: sched.last_cpu,
            voluntary_switches: sched.voluntary_switches,
            involuntary_switches: sched.involuntary_switches,
        }
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// Read-only view of a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub tid: Tid,
    pub pid: Pid,
    pub name: String,
    pub state: ThreadState,
    pub params: SchedParams,
    pub cpu_time: Duration,
    pub last_cpu: Option<CpuId>,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
}
