//! Kernel root object
//!
//! Everything the core owns hangs off one [`Kernel`], built by
//! [`Kernel::boot`]. There are no module-level globals.
//!
//! Lock order (take higher before lower, never the reverse):
//!
//! 1. `processes` registry (global process list)
//! 2. per-process `inner` (parent before child)
//! 3. per-process address space
//! 4. IPC object state
//! 5. wait queue
//! 6. thread `wait`, then thread `signals`
//! 7. per-CPU scheduler state
//! 8. thread `sched`
//!
//! The thread registry, the timer queue and the IPC name space are leaves:
//! nothing is acquired while holding them.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::info;
use spin::RwLock;

use crate::arch::{CpuId, Platform};
use crate::arena::Arena;
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::ipc::{HandleTable, IpcNamespace};
use crate::memory::{AddressSpace, FramePool, SwapDevice};
use crate::process::{Credentials, Pid, Process, ProcessInner, ProcessState, ResourceLimits};
use crate::sched::{CpuScheduler, SchedParams};
use crate::signal::SignalTable;
use crate::thread::{Thread, ThreadSnapshot, ThreadState, Tid};
use crate::time::{TimerQueue, Timestamp};

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) frames: FramePool,
    pub(crate) swap: Option<Arc<dyn SwapDevice>>,
    pub(crate) processes: RwLock<Arena<Arc<Process>>>,
    pub(crate) threads: RwLock<Arena<Arc<Thread>>>,
    pub(crate) cpus: Vec<CpuScheduler>,
    pub(crate) timers: TimerQueue,
    pub(crate) ipc: IpcNamespace,
    kernel_pid: Pid,
    init_pid: Pid,
}

/// Per-process state of the two processes built at boot
fn boot_inner(name: &str, pid: Pid, limits: ResourceLimits, params: SchedParams, state: ProcessState) -> ProcessInner {
    ProcessInner {
        name: name.to_string(),
        cmdline: Vec::new(),
        ppid: None,
        pgid: pid,
        state,
        threads: Vec::new(),
        main: None,
        children: Vec::new(),
        creds: Credentials::root(),
        handles: HandleTable::new(limits.max_files),
        limits,
        exit: None,
        signals: SignalTable::new(),
        default_params: params,
        retired_voluntary: 0,
        retired_involuntary: 0,
    }
}

impl Kernel {
    /// Build the core: kernel process, one idle thread per CPU, and init
    /// with its main thread queued
    ///
    /// CPUs are not dispatched yet; each one calls [`Kernel::start_cpu`].
    pub fn boot(
        config: KernelConfig,
        platform: Arc<dyn Platform>,
        swap: Option<Arc<dyn SwapDevice>>,
    ) -> KernelResult<Kernel> {
        config.validate()?;
        if config.cpu_count > platform.cpu_count() {
            return Err(KernelError::InvalidArgument);
        }
        let now = Timestamp::from_ns(platform.now_ns());
        let frames = FramePool::new(config.max_frames);

        let mut processes = Arena::new();
        let kernel_handle = processes.insert_with(|handle| {
            let pid = Pid::new(handle);
            let inner = boot_inner("kernel", pid, ResourceLimits::default(), SchedParams::idle(), ProcessState::Running);
            Arc::new(Process::new(pid, true, inner, AddressSpace::kernel(frames.clone()), now))
        });
        let init_handle = processes.insert_with(|handle| {
            let pid = Pid::new(handle);
            let limits = config.default_limits.clone();
            let mut space = AddressSpace::new(frames.clone(), swap.clone());
            space.set_memory_limit(limits.max_memory);
            let inner = boot_inner("init", pid, limits, config.init_params, ProcessState::Embryo);
            Arc::new(Process::new(pid, false, inner, space, now))
        });

        let cpus = (0..config.cpu_count).map(|id| CpuScheduler::new(id, config.normal_bands)).collect();
        let kernel = Kernel {
            platform,
            frames,
            swap,
            processes: RwLock::new(processes),
            threads: RwLock::new(Arena::new()),
            cpus,
            timers: TimerQueue::new(),
            ipc: IpcNamespace::new(),
            kernel_pid: Pid::new(kernel_handle),
            init_pid: Pid::new(init_handle),
            config,
        };

        for cpu in 0..kernel.config.cpu_count {
            let idle = kernel.create_kernel_thread(&format!("idle/{}", cpu), 0, SchedParams::idle())?;
            idle.state
                .transition(&[ThreadState::New], ThreadState::Ready)
                .and_then(|_| idle.state.transition(&[ThreadState::Ready], ThreadState::Running))
                .map_err(|_| KernelError::InvalidArgument)?;
            idle.sched.lock().last_cpu = Some(cpu);
            let mut state = kernel.cpus[cpu].state.lock();
            state.idle = Some(idle.clone());
            state.current = Some(idle);
            state.last_tick = now;
        }

        let init_thread = kernel.thread_create(kernel.init_pid, kernel.config.init_entry, 0, 0)?;
        kernel.start_thread(init_thread)?;

        info!(
            "core up: {} cpu(s), {} frames, init {} ({})",
            kernel.config.cpu_count,
            kernel.config.max_frames,
            kernel.init_pid,
            init_thread
        );
        Ok(kernel)
    }

    /// Monotonic time
    pub fn now(&self) -> Timestamp {
        Timestamp::from_ns(self.platform.now_ns())
    }

    /// CPU executing the caller
    pub fn cpu_id(&self) -> CpuId {
        self.platform.current_cpu()
    }

    pub fn cpu_count(&self) -> usize {
        self.config.cpu_count
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn ipc_namespace(&self) -> &IpcNamespace {
        &self.ipc
    }

    pub fn kernel_pid(&self) -> Pid {
        self.kernel_pid
    }

    pub fn init_pid(&self) -> Pid {
        self.init_pid
    }

    pub fn process(&self, pid: Pid) -> KernelResult<Arc<Process>> {
        self.processes.read().get(pid.handle()).cloned().ok_or(KernelError::NoSuchProcess)
    }

    pub fn thread(&self, tid: Tid) -> KernelResult<Arc<Thread>> {
        self.threads.read().get(tid.handle()).cloned().ok_or(KernelError::NoSuchThread)
    }

    pub fn thread_snapshot(&self, tid: Tid) -> KernelResult<ThreadSnapshot> {
        Ok(self.thread(tid)?.snapshot())
    }

    pub fn process_count(&self) -> usize {
        self.processes.read().len()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }

    /// Pending wait deadlines
    pub fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    /// Check the structural invariants of the core
    ///
    /// - every CPU runs its idle thread or a Running thread (or has a
    ///   reschedule pending), and every Running thread is current on
    ///   exactly one CPU
    /// - no Running thread sits in a run-queue
    /// - a thread is on at most one queue (run-queue or wait queue)
    /// - a live, non-Embryo process without an exit status has threads
    /// - regions of an address space do not overlap
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut queued: Vec<(CpuId, Tid)> = Vec::new();
        let mut current: Vec<(CpuId, Tid)> = Vec::new();
        for cpu in &self.cpus {
            let state = cpu.state.lock();
            match (&state.current, &state.idle) {
                (Some(thread), Some(idle)) => {
                    // A thread that blocked or died remotely stays in the slot
                    // until its CPU handles the reschedule request
                    let is_idle = Arc::ptr_eq(thread, idle);
                    if !is_idle && thread.state() != ThreadState::Running && !cpu.needs_resched() {
                        return Err(format!("cpu {}: current {} is {}", cpu.id(), thread.id(), thread.state()));
                    }
                    if is_idle || thread.last_cpu() == Some(cpu.id()) {
                        current.push((cpu.id(), thread.id()));
                    }
                }
                (None, _) => {}
                (Some(thread), None) => {
                    return Err(format!("cpu {}: current {} without an idle thread", cpu.id(), thread.id()));
                }
            }
            queued.extend(state.ready_tids().into_iter().map(|tid| (cpu.id(), tid)));
        }

        let threads: Vec<Arc<Thread>> = self.threads.read().iter().map(|(_, thread)| thread.clone()).collect();
        for thread in &threads {
            let tid = thread.id();
            let on_cpus = current.iter().filter(|(_, t)| *t == tid).count();
            let in_runqueues = queued.iter().filter(|(_, t)| *t == tid).count();
            let state = thread.state();
            if state == ThreadState::Running && !thread.is_idle() && on_cpus != 1 {
                return Err(format!("{} Running but current on {} cpus", tid, on_cpus));
            }
            if state == ThreadState::Running && in_runqueues > 0 {
                return Err(format!("{} Running and queued", tid));
            }
            let queue = thread.wait.lock().queue().cloned();
            let waiting = queue.map_or(false, |queue| queue.contains(tid));
            if in_runqueues + waiting as usize > 1 {
                return Err(format!("{} on {} run-queues, waiting: {}", tid, in_runqueues, waiting));
            }
        }

        let processes: Vec<Arc<Process>> = self.processes.read().iter().map(|(_, process)| process.clone()).collect();
        for process in &processes {
            {
                let inner = process.inner.lock();
                if inner.state != ProcessState::Embryo && inner.exit.is_none() && inner.threads.is_empty() {
                    return Err(format!("{} ({}) alive without threads", process.id(), inner.name));
                }
            }
            let space = process.space.lock();
            let mut last_end = 0u64;
            for region in space.regions() {
                if region.start < last_end {
                    return Err(format!("{}: region at {:#x} overlaps its predecessor", process.id(), region.start));
                }
                last_end = region.end();
            }
        }
        Ok(())
    }

    /// [`Kernel::check_invariants`] as a fatal assertion
    pub fn assert_invariants(&self) {
        if let Err(violation) = self.check_invariants() {
            sched_assert!(false, "{}", violation);
        }
    }
}
