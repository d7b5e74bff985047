//! Scheduler core - tick, dispatch, yield and cross-CPU placement
//!
//! Lock discipline: a CPU only ever locks its own `CpuState`. Work for
//! another CPU goes through that CPU's mailbox plus a reschedule IPI. The
//! per-thread `sched` entity is a leaf lock taken under the CPU lock.

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, trace};

use super::cpu::{CpuScheduler, CpuState};
use super::mailbox::CpuRequest;
use super::policy::{SchedClass, SchedParams};
use super::stats::{CpuStats, CpuStatsSnapshot};
use super::CpuMask;
use crate::arch::{CpuContext, CpuId, IpiVector, PageTableRoot};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::Capabilities;
use crate::signal::{SigInfo, SIGXCPU};
use crate::thread::{Thread, ThreadState, Tid};
use crate::time::Timestamp;

/// Why the current thread is giving up the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// Slice expiry, higher-rank arrival or remote request
    Preempt,
    /// The thread asked to yield
    Yield,
    /// First dispatch on a CPU; nothing to save
    Start,
}

/// Read-only view of one CPU's scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedSnapshot {
    pub cpu: CpuId,
    pub current: Option<Tid>,
    pub idle: Option<Tid>,
    /// Queued threads in selection order
    pub ready: Vec<Tid>,
    pub need_resched: bool,
    pub active_root: PageTableRoot,
    pub stats: CpuStatsSnapshot,
}

/// Something Ready outranks the current thread, or the slot is stale
fn preempt_needed(state: &CpuState) -> bool {
    let best = state.best_ready_rank();
    match &state.current {
        None => true,
        Some(current) if current.is_idle() => best.is_some(),
        Some(current) if current.state() != ThreadState::Running => true,
        Some(current) => best.map_or(false, |rank| rank > current.rank()),
    }
}

impl Kernel {
    pub(crate) fn cpu(&self, cpu: CpuId) -> KernelResult<&CpuScheduler> {
        self.cpus.get(cpu).ok_or(KernelError::InvalidArgument)
    }

    /// Replay requests other CPUs posted to `cpu`
    fn apply_requests(&self, cpu: &CpuScheduler, state: &mut CpuState) {
        for request in cpu.mailbox.drain() {
            CpuStats::bump(&cpu.stats.requests_drained);
            match request {
                CpuRequest::Enqueue(thread) => {
                    let still_ours = thread.sched.lock().queued_on == Some(cpu.id());
                    if still_ours && thread.state() == ThreadState::Ready {
                        state.enqueue(thread);
                    }
                }
                CpuRequest::Remove(tid) => {
                    state.remove(tid);
                }
            }
        }
    }

    /// Free kernel stacks of threads this CPU switched away from for good
    fn reap_dead(state: &mut CpuState) {
        for thread in state.dead.drain(..) {
            thread.release_kernel_stack();
        }
    }

    /// Charge `delta` of CPU time to the thread and its process
    fn charge(&self, thread: &Arc<Thread>, delta: crate::time::Duration) {
        if thread.is_idle() || delta.is_zero() {
            return;
        }
        thread.add_cpu_time(delta);
        if let Some(process) = thread.process() {
            process.add_cpu_time(delta);
        }
        let mut sched = thread.sched.lock();
        sched.remaining = sched.remaining - delta;
    }

    /// Place a Ready thread on a run-queue
    ///
    /// Goes to its last CPU if affinity allows, else the calling CPU, else
    /// the first allowed CPU. Remote placement is posted to the target's
    /// mailbox and signalled with a reschedule IPI.
    pub(crate) fn enqueue_thread(&self, thread: &Arc<Thread>) {
        if thread.is_idle() {
            return;
        }
        let here = self.cpu_id();
        let target = {
            let mut sched = thread.sched.lock();
            let allowed = sched.affinity.online(self.cpu_count());
            let target = match sched.last_cpu {
                Some(cpu) if allowed.is_set(cpu) => cpu,
                _ if allowed.is_set(here) => here,
                _ => allowed.first().unwrap_or(here),
            };
            sched.queued_on = Some(target);
            target
        };
        let cpu = &self.cpus[target];
        if target == here {
            let mut state = cpu.state.lock();
            state.enqueue(thread.clone());
            if preempt_needed(&state) {
                cpu.request_resched();
            }
        } else {
            cpu.mailbox.post(CpuRequest::Enqueue(thread.clone()));
            self.platform.send_ipi(target, IpiVector::Reschedule);
        }
        trace!("{} queued on cpu {}", thread.id(), target);
    }

    /// Unlink a Ready thread from whatever run-queue holds it
    fn dequeue_thread(&self, thread: &Arc<Thread>) {
        let Some(target) = thread.sched.lock().queued_on.take() else { return };
        if target == self.cpu_id() {
            self.cpus[target].state.lock().remove(thread.id());
        } else {
            self.cpus[target].mailbox.post(CpuRequest::Remove(thread.id()));
            self.platform.send_ipi(target, IpiVector::Reschedule);
        }
    }

    /// Ask the CPU running `cpu` to pick again
    fn kick(&self, cpu: CpuId) {
        self.cpus[cpu].request_resched();
        if cpu != self.cpu_id() {
            self.platform.send_ipi(cpu, IpiVector::Reschedule);
        }
    }

    /// Take a thread that just left Ready/Running off its CPU
    ///
    /// `prev` is the state it left. A Running thread on the calling CPU is
    /// switched away from immediately; on another CPU it is kicked.
    pub(crate) fn deschedule(&self, thread: &Arc<Thread>, prev: ThreadState) {
        match prev {
            ThreadState::Ready => self.dequeue_thread(thread),
            ThreadState::Running => {
                let Some(cpu) = thread.last_cpu() else { return };
                if cpu == self.cpu_id() {
                    if let Err(err) = self.reschedule(cpu, SwitchReason::Preempt) {
                        log_error!(err, "reschedule on cpu {}", cpu);
                    }
                } else {
                    self.kick(cpu);
                }
            }
            _ => {}
        }
    }

    /// Mark `next` Running in `state` and account the dispatch
    fn dispatch(&self, cpu: CpuId, state: &mut CpuState, next: &Arc<Thread>, now: Timestamp) {
        if next.is_idle() {
            let _ = next.state.transition(&[ThreadState::Ready, ThreadState::Running], ThreadState::Running);
        } else {
            let dispatched = next.state.transition(&[ThreadState::Ready], ThreadState::Running);
            sched_assert!(dispatched.is_ok(), "{} selected while {:?}", next.id(), dispatched);
        }
        {
            let mut sched = next.sched.lock();
            sched.refill();
            sched.last_scheduled = now;
            sched.last_cpu = Some(cpu);
            sched.queued_on = None;
            sched.dispatches += 1;
        }
        state.current = Some(next.clone());
    }

    /// `schedule_next`: requeue the current thread if still runnable, pick
    /// the best Ready thread and switch to it
    pub fn schedule_next(&self, cpu: CpuId) -> KernelResult<Tid> {
        self.reschedule(cpu, SwitchReason::Preempt)
    }

    pub(crate) fn reschedule(&self, cpu_id: CpuId, reason: SwitchReason) -> KernelResult<Tid> {
        let cpu = self.cpu(cpu_id)?;
        let now = self.now();
        let mut migrate = None;

        let (prev, next) = {
            let mut state = cpu.state.lock();
            Self::reap_dead(&mut state);
            self.apply_requests(cpu, &mut state);
            cpu.take_resched();

            let delta = now - state.last_tick;
            state.last_tick = now;
            let prev = state.current.take();

            // A stale slot (the thread blocked or moved while this CPU had a
            // reschedule pending) is only dropped, never requeued
            let prev = prev.filter(|p| p.is_idle() || p.last_cpu() == Some(cpu_id));
            if let Some(prev) = &prev {
                self.charge(prev, delta);
                if prev.is_idle() {
                    let _ = prev.state.transition(&[ThreadState::Running], ThreadState::Ready);
                } else if prev.state.transition(&[ThreadState::Running], ThreadState::Ready).is_ok() {
                    let allowed = {
                        let mut sched = prev.sched.lock();
                        match reason {
                            SwitchReason::Yield => sched.voluntary_switches += 1,
                            _ => sched.involuntary_switches += 1,
                        }
                        sched.affinity.is_set(cpu_id)
                    };
                    if allowed {
                        prev.sched.lock().queued_on = Some(cpu_id);
                        state.enqueue(prev.clone());
                    } else {
                        migrate = Some(prev.clone());
                    }
                } else {
                    prev.sched.lock().voluntary_switches += 1;
                }
            }

            let next = state.select_next().ok_or(KernelError::NoSuchThread)?;
            let same = prev.as_ref().map_or(false, |p| Arc::ptr_eq(p, &next));
            self.dispatch(cpu_id, &mut state, &next, now);

            // Kernel threads run on whatever user tables are loaded
            let root = next.space_root();
            if root != PageTableRoot::KERNEL && root != state.active_root {
                state.active_root = root;
                self.platform.activate_address_space(root);
            }
            if same {
                trace!("cpu {}: {} keeps running", cpu_id, next.id());
                return Ok(next.id());
            }

            CpuStats::bump(&cpu.stats.context_switches);
            match reason {
                SwitchReason::Yield => CpuStats::bump(&cpu.stats.yields),
                SwitchReason::Preempt if prev.as_ref().map_or(false, |p| p.state() == ThreadState::Ready) => {
                    CpuStats::bump(&cpu.stats.preemptions)
                }
                _ => {}
            }

            if let Some(prev) = &prev {
                sched_assert!(!prev.kernel_stack_overflowed(), "{} kernel stack canary smashed", prev.id());
                if prev.state() == ThreadState::Terminated {
                    state.dead.push(prev.clone());
                }
            }
            (prev, next)
        };

        if let Some(thread) = migrate {
            self.enqueue_thread(&thread);
        }

        trace!("cpu {}: {:?} -> {}", cpu_id, prev.as_ref().map(|p| p.id()), next.id());

        let next_ctx = next.context_ptr() as *const CpuContext;
        let save = match &prev {
            Some(prev) if reason != SwitchReason::Start && prev.state() != ThreadState::Terminated => {
                Some(prev.context_ptr())
            }
            _ => None,
        };
        // SAFETY: both contexts belong to threads kept alive by the Arcs held
        // here and in the CPU state; no lock is held across the switch.
        unsafe {
            match save {
                Some(prev_ctx) => self.platform.switch_context(prev_ctx, next_ctx),
                None => self.platform.restore_context(next_ctx),
            }
        }
        Ok(next.id())
    }

    /// Timer interrupt entry for `cpu`
    ///
    /// Charges the elapsed time to the current thread, expires wait
    /// deadlines, and reschedules when the slice ran out or a higher-rank
    /// thread is Ready.
    pub fn scheduler_tick(&self, cpu_id: CpuId) -> KernelResult<()> {
        let cpu = self.cpu(cpu_id)?;
        let now = self.now();
        CpuStats::bump(&cpu.stats.ticks);
        self.expire_timers(now);

        let (should_preempt, current) = {
            let mut state = cpu.state.lock();
            Self::reap_dead(&mut state);
            self.apply_requests(cpu, &mut state);
            let delta = now - state.last_tick;
            state.last_tick = now;
            let current = state.current.clone();
            let mut preempt = preempt_needed(&state);
            match &current {
                Some(thread) if !thread.is_idle() && thread.last_cpu() == Some(cpu_id) => {
                    self.charge(thread, delta);
                    let sched = thread.sched.lock();
                    if sched.slice.is_some() && sched.remaining.is_zero() {
                        preempt = true;
                    }
                }
                _ => CpuStats::bump(&cpu.stats.idle_ticks),
            }
            (preempt | cpu.take_resched(), current)
        };

        if let Some(thread) = current.filter(|t| !t.is_idle()) {
            self.check_cpu_limit(&thread);
        }
        if should_preempt {
            self.reschedule(cpu_id, SwitchReason::Preempt)?;
        }
        Ok(())
    }

    /// SIGXCPU once the process exceeds its CPU-time limit
    fn check_cpu_limit(&self, thread: &Arc<Thread>) {
        let Some(process) = thread.process() else { return };
        if process.cpu_limit_crossed() {
            debug!("{} exceeded its CPU time limit", process.id());
            let _ = self.signal_to_process(process.id(), SIGXCPU, Some(SigInfo::kernel(SIGXCPU)));
        }
    }

    /// Give up the CPU voluntarily; the thread goes to its band's tail
    pub fn yield_now(&self, tid: Tid) -> KernelResult<()> {
        let thread = self.thread(tid)?;
        if thread.state() != ThreadState::Running {
            return Ok(());
        }
        let cpu = thread.last_cpu().unwrap_or_else(|| self.cpu_id());
        if cpu == self.cpu_id() {
            self.reschedule(cpu, SwitchReason::Yield)?;
        } else {
            self.kick(cpu);
        }
        Ok(())
    }

    /// Inter-processor interrupt entry for `cpu`
    pub fn handle_ipi(&self, cpu_id: CpuId, vector: IpiVector) -> KernelResult<()> {
        let cpu = self.cpu(cpu_id)?;
        CpuStats::bump(&cpu.stats.ipis_handled);
        match vector {
            IpiVector::Reschedule => {
                let resched = {
                    let mut state = cpu.state.lock();
                    self.apply_requests(cpu, &mut state);
                    preempt_needed(&state)
                };
                if resched | cpu.take_resched() {
                    self.reschedule(cpu_id, SwitchReason::Preempt)?;
                }
            }
            IpiVector::Halt => log::warn!("cpu {} halted by IPI", cpu_id),
        }
        Ok(())
    }

    /// Bring `cpu` into the scheduler: first dispatch, nothing saved
    pub fn start_cpu(&self, cpu_id: CpuId) -> KernelResult<Tid> {
        let tid = self.reschedule(cpu_id, SwitchReason::Start)?;
        debug!("cpu {} started with {}", cpu_id, tid);
        Ok(tid)
    }

    /// Caller may change `target`'s scheduling: same process, or the
    /// credentials rule used for signals
    fn check_sched_permission(&self, caller: &Thread, target: &Thread) -> KernelResult<crate::process::Credentials> {
        let caller_process = self.process(caller.pid())?;
        let creds = caller_process.credentials();
        if caller.pid() == target.pid() {
            return Ok(creds);
        }
        let target_creds = self.process(target.pid())?.credentials();
        if creds.can_signal(&target_creds) {
            Ok(creds)
        } else {
            Err(KernelError::PermissionDenied)
        }
    }

    /// Change class, priority or nice of `target`
    ///
    /// Entering the real-time class, raising a real-time priority or
    /// lowering nice requires `SYS_NICE`.
    pub fn set_sched_params(&self, caller: Tid, target: Tid, params: SchedParams) -> KernelResult<()> {
        params.validate(self.config.normal_bands)?;
        let caller_thread = self.thread(caller)?;
        let thread = self.thread(target)?;
        if thread.is_idle() {
            return Err(KernelError::PermissionDenied);
        }
        let creds = self.check_sched_permission(&caller_thread, &thread)?;
        let old = thread.sched_params();
        let more_urgent = match (old.class, params.class) {
            (SchedClass::Realtime, SchedClass::Realtime) => params.priority > old.priority,
            (_, SchedClass::Realtime) => true,
            _ => params.nice < old.nice,
        };
        if more_urgent && !creds.has(Capabilities::SYS_NICE) {
            return Err(KernelError::PermissionDenied);
        }

        self.requeue_with(&thread, |sched| sched.set_params(params, &self.config));
        debug!("{} now {:?}", target, params);
        Ok(())
    }

    /// Restrict the CPUs `target` may run on
    pub fn set_affinity(&self, caller: Tid, target: Tid, mask: CpuMask) -> KernelResult<()> {
        let mask = mask.online(self.cpu_count());
        if mask.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let caller_thread = self.thread(caller)?;
        let thread = self.thread(target)?;
        if thread.is_idle() {
            return Err(KernelError::PermissionDenied);
        }
        self.check_sched_permission(&caller_thread, &thread)?;
        self.requeue_with(&thread, |sched| sched.affinity = mask);
        Ok(())
    }

    /// Apply `update` to the thread's entity and fix up its queue position
    fn requeue_with(&self, thread: &Arc<Thread>, update: impl FnOnce(&mut super::SchedEntity)) {
        match thread.state() {
            ThreadState::Ready => {
                self.dequeue_thread(thread);
                update(&mut thread.sched.lock());
                if thread.state() == ThreadState::Ready {
                    self.enqueue_thread(thread);
                }
            }
            ThreadState::Running => {
                update(&mut thread.sched.lock());
                if let Some(cpu) = thread.last_cpu() {
                    self.kick(cpu);
                }
            }
            _ => update(&mut thread.sched.lock()),
        }
    }

    /// Load `root` on `cpu` for a thread that keeps running there
    pub(crate) fn activate_on(&self, cpu: CpuId, root: PageTableRoot) {
        if cpu != self.cpu_id() {
            self.kick(cpu);
            return;
        }
        if let Some(scheduler) = self.cpus.get(cpu) {
            scheduler.state.lock().active_root = root;
            self.platform.activate_address_space(root);
        }
    }

    /// Thread in `cpu`'s current slot
    pub fn current(&self, cpu: CpuId) -> Option<Arc<Thread>> {
        self.cpus.get(cpu)?.state.lock().current.clone()
    }

    pub fn current_thread(&self, cpu: CpuId) -> Option<Tid> {
        self.current(cpu).map(|thread| thread.id())
    }

    pub fn scheduler_snapshot(&self, cpu_id: CpuId) -> KernelResult<SchedSnapshot> {
        let cpu = self.cpu(cpu_id)?;
        let state = cpu.state.lock();
        Ok(SchedSnapshot {
            cpu: cpu_id,
            current: state.current_tid(),
            idle: state.idle.as_ref().map(|t| t.id()),
            ready: state.ready_tids(),
            need_resched: cpu.needs_resched(),
            active_root: state.active_root,
            stats: cpu.stats.snapshot(),
        })
    }
}
