//! Signal delivery
//!
//! Sending (`signal_send`, `signal_to_process`, `signal_to_thread`),
//! acting on pending signals at safe points (`handle_pending`) and
//! returning from handlers (`signal_return`).
//!
//! Locks: process inner, then thread signals. A signal that becomes
//! deliverable breaks the target's wait after the locks are dropped.

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, info, trace, warn};
use zerocopy::{AsBytes, FromBytes};

use super::action::{default_action, is_stop_signal, DefaultAction, Disposition, Handler, SaFlags};
use super::frame::SignalFrame;
use super::info::SigInfo;
use super::types::*;
use crate::arch::IpiVector;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::memory::{AccessKind, FaultError};
use crate::process::{ExitStatus, Pid, Process, ProcessState};
use crate::thread::{Thread, ThreadState, Tid};

/// Receiver of `signal_send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    Process(Pid),
    /// Every process in the group
    Group(Pid),
    /// Every process in the sender's group
    OwnGroup,
}

/// What `handle_pending` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    /// Nothing deliverable, or only ignored signals
    Nothing,
    /// The thread now resumes in the handler for this signal
    HandlerInvoked(u32),
    /// The process was stopped
    Stopped,
    /// The process is exiting
    Terminated,
}

impl Kernel {
    /// `signal_send`: permission-checked delivery from user space
    ///
    /// Allowed when the sender's effective uid matches the target's real or
    /// effective uid, or the sender holds `KILL`. Signal 0 only checks.
    pub fn signal_send(&self, sender: Pid, target: SignalTarget, sig: u32, value: Option<u64>) -> KernelResult<()> {
        if sig != 0 {
            check_signal(sig)?;
        }
        let sender_process = self.process(sender)?;
        let creds = sender_process.credentials();
        let targets: Vec<Arc<Process>> = match target {
            SignalTarget::Process(pid) => alloc::vec![self.process(pid)?],
            SignalTarget::Group(pgid) => self.group_members(pgid),
            SignalTarget::OwnGroup => self.group_members(sender_process.pgid()),
        };
        if targets.is_empty() {
            return Err(KernelError::NoSuchProcess);
        }

        let permitted: Vec<Arc<Process>> = targets
            .into_iter()
            .filter(|process| !process.is_kernel() && creds.can_signal(&process.credentials()))
            .collect();
        if permitted.is_empty() {
            return Err(KernelError::PermissionDenied);
        }
        if sig == 0 {
            return Ok(());
        }

        let mut info = SigInfo::user(sig, sender, creds.ruid);
        if let Some(value) = value {
            info = info.with_value(value);
        }
        for process in permitted {
            self.signal_to_process(process.id(), sig, Some(info))?;
        }
        Ok(())
    }

    fn group_members(&self, pgid: Pid) -> Vec<Arc<Process>> {
        let candidates: Vec<Arc<Process>> =
            self.processes.read().iter().map(|(_, process)| process.clone()).collect();
        candidates
            .into_iter()
            .filter(|process| !process.is_kernel() && !process.has_exited() && process.pgid() == pgid)
            .collect()
    }

    /// `signal_to_process`: deliver to one thread of `pid`
    ///
    /// SIGKILL exits the process, SIGSTOP/SIGCONT stop and resume it
    /// immediately. Otherwise the target is the first thread not blocking
    /// `sig`, or the oldest live thread when all block it.
    pub fn signal_to_process(&self, pid: Pid, sig: u32, info: Option<SigInfo>) -> KernelResult<()> {
        check_signal(sig)?;
        let process = self.process(pid)?;
        if process.is_kernel() {
            return Err(KernelError::PermissionDenied);
        }
        if process.has_exited() {
            return Ok(());
        }
        trace!("{} <- signal {}", pid, sig);

        match sig {
            SIGKILL => return self.process_exit(pid, ExitStatus::Signaled { signal: SIGKILL, core: false }),
            SIGSTOP => {
                self.stop_process(&process);
                return Ok(());
            }
            SIGCONT => self.continue_process(&process),
            _ if is_stop_signal(sig) => self.discard_everywhere(&process, |s| s == SIGCONT),
            _ => {}
        }

        let threads = {
            let inner = process.inner.lock();
            if inner.signals.is_ignored(sig) {
                return Ok(());
            }
            inner.threads.clone()
        };
        let target = threads
            .iter()
            .copied()
            .find(|tid| {
                self.thread(*tid)
                    .map(|thread| !thread.signals.lock().blocked().contains(sig))
                    .unwrap_or(false)
            })
            .or_else(|| threads.first().copied())
            .ok_or(KernelError::NoSuchThread)?;
        self.raise_on_thread(&self.thread(target)?, sig, info)
    }

    /// `signal_to_thread` (tkill): deliver to exactly `tid`
    pub fn signal_to_thread(&self, tid: Tid, sig: u32, info: Option<SigInfo>) -> KernelResult<()> {
        check_signal(sig)?;
        let thread = self.thread(tid)?;
        if thread.is_idle() {
            return Err(KernelError::PermissionDenied);
        }
        if is_unblockable(sig) {
            return self.signal_to_process(thread.pid(), sig, info);
        }
        if let Some(process) = thread.process() {
            if process.has_exited() {
                return Ok(());
            }
            if sig == SIGCONT {
                self.continue_process(&process);
            } else if is_stop_signal(sig) {
                self.discard_everywhere(&process, |s| s == SIGCONT);
            }
            if process.inner.lock().signals.is_ignored(sig) {
                return Ok(());
            }
        }
        self.raise_on_thread(&thread, sig, info)
    }

    /// Set the pending bit and kick the thread if it can take the signal now
    fn raise_on_thread(&self, thread: &Arc<Thread>, sig: u32, info: Option<SigInfo>) -> KernelResult<()> {
        let deliverable = {
            let mut signals = thread.signals.lock();
            signals.raise(sig, info)?;
            !signals.blocked().contains(sig)
        };
        if !deliverable {
            return Ok(());
        }
        if self.interrupt_wait(thread) {
            debug!("{} interrupted by signal {}", thread.id(), sig);
        } else if thread.state() == ThreadState::Running {
            if let Some(cpu) = thread.last_cpu().filter(|cpu| *cpu != self.cpu_id()) {
                self.platform.send_ipi(cpu, IpiVector::Reschedule);
            }
        }
        Ok(())
    }

    /// Drop pending instances matching `filter` from every thread
    fn discard_everywhere(&self, process: &Process, filter: impl Fn(u32) -> bool) {
        for tid in process.threads() {
            if let Ok(thread) = self.thread(tid) {
                let mut signals = thread.signals.lock();
                for sig in signals.pending().iter().filter(|sig| filter(*sig)) {
                    signals.discard(sig);
                }
            }
        }
    }

    /// Tell the parent about a stop or continue unless it asked not to know
    fn notify_parent_stop(&self, process: &Process, status: i32) {
        let Some(parent) = process.ppid().and_then(|ppid| self.process(ppid).ok()) else { return };
        let quiet = match parent.inner.lock().signals.get(SIGCHLD) {
            Ok(Disposition::Custom(handler)) => handler.flags.contains(SaFlags::NOCLDSTOP),
            _ => false,
        };
        if !quiet {
            let _ = self.signal_to_process(parent.id(), SIGCHLD, Some(SigInfo::child(SIGCHLD, process.id(), status)));
        }
    }

    /// Stop every thread of `process`
    ///
    /// Ready and Running threads become Suspended; sleeping threads stay
    /// on their wait and land in Suspended when woken.
    pub(crate) fn stop_process(&self, process: &Arc<Process>) {
        let threads = {
            let mut inner = process.inner.lock();
            if inner.state != ProcessState::Running {
                return;
            }
            inner.state = ProcessState::Stopped;
            inner.threads.clone()
        };
        info!("{} stopped", process.id());
        self.notify_parent_stop(process, SIGSTOP as i32);

        self.discard_everywhere(process, |s| s == SIGCONT);
        let here = self.current_thread(self.cpu_id());
        let (own, others): (Vec<Tid>, Vec<Tid>) = threads.into_iter().partition(|tid| Some(*tid) == here);
        for tid in others.into_iter().chain(own) {
            let Ok(thread) = self.thread(tid) else { continue };
            thread.set_stopped(true);
            if let Ok(prev) = thread
                .state
                .transition(&[ThreadState::Ready, ThreadState::Running], ThreadState::Suspended)
            {
                self.deschedule(&thread, prev);
            }
        }
    }

    /// Resume a stopped process and drop its pending stop signals
    pub(crate) fn continue_process(&self, process: &Arc<Process>) {
        let threads = {
            let mut inner = process.inner.lock();
            if inner.state != ProcessState::Stopped {
                drop(inner);
                self.discard_everywhere(process, is_stop_signal);
                return;
            }
            inner.state = ProcessState::Running;
            inner.threads.clone()
        };
        self.discard_everywhere(process, is_stop_signal);
        for tid in threads {
            let Ok(thread) = self.thread(tid) else { continue };
            thread.set_stopped(false);
            if thread.state.transition(&[ThreadState::Suspended], ThreadState::Ready).is_ok() {
                self.enqueue_thread(&thread);
            }
        }
        info!("{} continued", process.id());
        self.notify_parent_stop(process, SIGCONT as i32);
    }

    /// `sigaction`: install a disposition, returning the previous one
    ///
    /// Setting Ignore (or Default for a default-ignored signal) discards
    /// instances already pending in the process.
    pub fn sigaction(&self, pid: Pid, sig: u32, disposition: Option<Disposition>) -> KernelResult<Disposition> {
        let process = self.process(pid)?;
        let (old, ignored) = {
            let mut inner = process.inner.lock();
            match disposition {
                Some(disposition) => {
                    let old = inner.signals.set(sig, disposition)?;
                    (old, inner.signals.is_ignored(sig))
                }
                None => (inner.signals.get(sig)?, false),
            }
        };
        if ignored {
            self.discard_everywhere(&process, |s| s == sig);
        }
        Ok(old)
    }

    /// `sigprocmask`: change the calling thread's blocked set
    ///
    /// SIGKILL and SIGSTOP are silently kept unblocked. Returns the old set.
    pub fn sigprocmask(&self, tid: Tid, how: MaskHow, set: Option<SigSet>) -> KernelResult<SigSet> {
        let thread = self.thread(tid)?;
        let mut signals = thread.signals.lock();
        let old = signals.blocked();
        if let Some(set) = set {
            let new = match how {
                MaskHow::Block => old.union(set),
                MaskHow::Unblock => old.difference(set),
                MaskHow::SetMask => set,
            };
            signals.set_blocked(new);
        }
        Ok(old)
    }

    /// Pending signals of the thread (blocked or not)
    pub fn sigpending(&self, tid: Tid) -> KernelResult<SigSet> {
        Ok(self.thread(tid)?.signals.lock().pending())
    }

    /// `handle_pending`: act on deliverable signals, lowest number first
    ///
    /// Ignored and default-ignored signals are consumed; default actions
    /// stop or terminate the process; the first custom handler found is
    /// entered and ends this pass.
    pub fn handle_pending(&self, tid: Tid) -> KernelResult<SignalDelivery> {
        let thread = self.thread(tid)?;
        let Some(process) = thread.process() else { return Ok(SignalDelivery::Nothing) };
        if process.is_kernel() {
            return Ok(SignalDelivery::Nothing);
        }

        loop {
            let (sig, info, disposition) = {
                let mut inner = process.inner.lock();
                let mut signals = thread.signals.lock();
                let Some(sig) = signals.next_deliverable() else { return Ok(SignalDelivery::Nothing) };
                let info = signals.take(sig);
                let disposition = inner.signals.get(sig)?;
                if let Disposition::Custom(handler) = disposition {
                    if handler.flags.contains(SaFlags::RESETHAND) {
                        inner.signals.reset(sig);
                    }
                }
                (sig, info, disposition)
            };

            match disposition {
                Disposition::Ignore => continue,
                Disposition::Default => match default_action(sig) {
                    DefaultAction::Ignore | DefaultAction::Continue => continue,
                    DefaultAction::Stop => {
                        self.stop_process(&process);
                        return Ok(SignalDelivery::Stopped);
                    }
                    DefaultAction::Terminate => {
                        self.process_exit(process.id(), ExitStatus::Signaled { signal: sig, core: false })?;
                        return Ok(SignalDelivery::Terminated);
                    }
                    DefaultAction::TerminateWithCore => {
                        self.process_exit(process.id(), ExitStatus::Signaled { signal: sig, core: true })?;
                        return Ok(SignalDelivery::Terminated);
                    }
                },
                Disposition::Custom(handler) => {
                    let info = info.unwrap_or_else(|| SigInfo::kernel(sig));
                    return self.enter_handler(&thread, &process, sig, info, handler);
                }
            }
        }
    }

    /// Push a signal frame and redirect the thread into `handler`
    fn enter_handler(
        &self,
        thread: &Arc<Thread>,
        process: &Arc<Process>,
        sig: u32,
        info: SigInfo,
        handler: Handler,
    ) -> KernelResult<SignalDelivery> {
        let context = thread.context();
        let saved_mask = thread.signals.lock().blocked();
        let frame = SignalFrame::new(sig, saved_mask.bits(), info.to_raw(), context);

        let mut redirected = context;
        let written = SignalFrame::place_below(context.stack_pointer()).and_then(|addr| {
            let mut space = process.space.lock();
            space.write(addr, frame.as_bytes()).ok()?;
            let slot = redirected.prepare_signal_handler(
                handler.entry,
                addr,
                sig as u64,
                addr + SignalFrame::INFO_OFFSET,
                addr,
                handler.restorer,
            );
            if let Some((slot, value)) = slot {
                space.write(slot, &value.to_le_bytes()).ok()?;
            }
            Some(addr)
        });
        let Some(addr) = written else {
            warn!("{}: no room for signal {} frame, killing {}", thread.id(), sig, process.id());
            self.process_exit(process.id(), ExitStatus::Signaled { signal: SIGSEGV, core: true })?;
            return Ok(SignalDelivery::Terminated);
        };

        thread.set_context(redirected);
        {
            let mut signals = thread.signals.lock();
            signals.push_frame(addr);
            let mut blocked = saved_mask.union(handler.mask);
            if !handler.flags.contains(SaFlags::NODEFER) {
                blocked.add(sig);
            }
            signals.set_blocked(blocked);
        }
        debug!("{} enters handler {:#x} for signal {}", thread.id(), handler.entry, sig);
        Ok(SignalDelivery::HandlerInvoked(sig))
    }

    /// `signal_return`: restore the context and mask saved by the last
    /// handler entry
    ///
    /// A frame that fails validation raises SIGSEGV.
    pub fn signal_return(&self, tid: Tid) -> KernelResult<()> {
        let thread = self.thread(tid)?;
        let process = thread.process().ok_or(KernelError::NoSuchProcess)?;
        let addr = thread.signals.lock().pop_frame().ok_or(KernelError::InvalidArgument)?;

        let mut bytes = [0u8; SignalFrame::SIZE];
        let frame = process
            .space
            .lock()
            .read(addr, &mut bytes)
            .ok()
            .and_then(|_| SignalFrame::read_from(&bytes[..]))
            .filter(|frame| frame.is_valid() && frame.context.is_user());
        let Some(frame) = frame else {
            warn!("{}: corrupt signal frame at {:#x}", tid, addr);
            self.signal_to_thread(tid, SIGSEGV, Some(SigInfo::fault(SIGSEGV, addr)))?;
            return Err(KernelError::BadAddress);
        };

        thread.set_context(frame.context);
        thread.signals.lock().set_blocked(SigSet::from_bits(frame.saved_mask));
        trace!("{} returns from signal {}", tid, frame.signo);
        Ok(())
    }

    /// Page-fault entry: resolve the fault or convert it to a signal
    ///
    /// `Segfault` raises SIGSEGV with the fault address, `Io` SIGBUS and
    /// `Oom` kills the process. A hit on the kernel stack guard halts.
    pub fn handle_page_fault(&self, tid: Tid, addr: u64, access: AccessKind) -> KernelResult<()> {
        let thread = self.thread(tid)?;
        sched_assert!(!thread.kernel_stack_guard_hit(addr), "{} kernel stack overflow at {:#x}", tid, addr);
        let process = thread.process().ok_or(KernelError::NoSuchProcess)?;
        let result = process.space.lock().handle_fault(addr, access);
        match result {
            Ok(()) => Ok(()),
            Err(FaultError::Segfault) => {
                debug!("{} segfault at {:#x} ({:?})", tid, addr, access);
                self.signal_to_thread(tid, SIGSEGV, Some(SigInfo::fault(SIGSEGV, addr)))
            }
            Err(FaultError::Io) => self.signal_to_thread(tid, SIGBUS, Some(SigInfo::fault(SIGBUS, addr))),
            Err(FaultError::Oom) => {
                warn!("{} out of memory at {:#x}", process.id(), addr);
                self.signal_to_process(process.id(), SIGKILL, None)
            }
        }
    }
}
