//! Process lifecycle
//!
//! Create, spawn, exit, wait, fork and exec. Process-tree edits take the
//! global process-list lock, then the per-process lock of the parent, then
//! (one at a time) the per-process locks of children.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, info, warn};

use super::{Credentials, ExitInfo, ExitStatus, Pid, Process, ProcessInner, ProcessState};
use crate::error::{KernelError, KernelResult};
use crate::ipc::HandleTable;
use crate::kernel::Kernel;
use crate::memory::{
    page_align_down, page_align_up, AddressSpace, Backing, BackingStore, Protection, RegionKind, PAGE_SIZE,
    USER_TOP,
};
use crate::sched::SchedEntity;
use crate::signal::{SigInfo, SignalTable, SIGCHLD};
use crate::sync::{Progress, WaitReason};
use crate::thread::{KernelStack, Thread, ThreadKind, ThreadState, Tid, UserStack};
use crate::thread::thread::ThreadSeed;
use crate::time::Timeout;

/// Which children a `process_wait` accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSelector {
    Any,
    Pid(Pid),
    /// Any child in this process group
    Group(Pid),
}

/// One loadable segment of an executable image
#[derive(Clone)]
pub struct ExecSegment {
    pub vaddr: u64,
    pub mem_size: usize,
    pub prot: Protection,
    /// Backing object and page-aligned offset; `None` is zero-filled
    pub file: Option<(Arc<dyn BackingStore>, u64)>,
}

/// Image description handed to `process_exec`
#[derive(Clone)]
pub struct ExecImage {
    pub name: String,
    pub argv: Vec<String>,
    pub entry: u64,
    pub segments: Vec<ExecSegment>,
    /// Main stack size; 0 picks the configured default
    pub stack_size: usize,
}

impl Kernel {
    /// Fresh per-process state for a child of `parent`
    fn child_inner(&self, name: &str, parent: &ProcessInner, parent_pid: Pid, creds: Credentials) -> ProcessInner {
        let limits = self.config.default_limits.clone();
        ProcessInner {
            name: name.to_string(),
            cmdline: Vec::new(),
            ppid: Some(parent_pid),
            pgid: parent.pgid,
            state: ProcessState::Embryo,
            threads: Vec::new(),
            main: None,
            children: Vec::new(),
            creds,
            handles: HandleTable::new(limits.max_files),
            limits,
            exit: None,
            signals: SignalTable::new(),
            default_params: parent.default_params,
            retired_voluntary: 0,
            retired_involuntary: 0,
        }
    }

    /// Insert a process record built by `build` as a child of `parent`
    ///
    /// Checks the parent's child limit and links the child under the
    /// global lock, so a failure leaves nothing behind.
    fn install_child(
        &self,
        parent: &Arc<Process>,
        build: impl FnOnce(&ProcessInner) -> KernelResult<(ProcessInner, AddressSpace)>,
    ) -> KernelResult<Arc<Process>> {
        let now = self.now();
        let mut registry = self.processes.write();
        let mut parent_inner = parent.inner.lock();
        if parent_inner.exit.is_some() {
            return Err(KernelError::NoSuchProcess);
        }
        if parent_inner.children.len() >= parent_inner.limits.max_children {
            return Err(KernelError::LimitExceeded);
        }
        let (inner, space) = build(&parent_inner)?;
        let handle = registry.insert_with(|handle| Arc::new(Process::new(Pid::new(handle), false, inner, space, now)));
        let child = registry.get(handle).cloned().ok_or(KernelError::NoSuchProcess)?;
        parent_inner.children.push(child.id());
        Ok(child)
    }

    /// `process_create`: an Embryo process with an empty address space
    ///
    /// Children of init get full credentials, others inherit the parent's.
    pub fn process_create(&self, name: &str, parent: Pid) -> KernelResult<Pid> {
        let parent_process = self.process(parent)?;
        if parent_process.is_kernel() {
            return Err(KernelError::PermissionDenied);
        }
        let privileged = parent == self.init_pid();
        let child = self.install_child(&parent_process, |parent_inner| {
            let creds = if privileged { Credentials::root() } else { parent_inner.creds.clone() };
            let inner = self.child_inner(name, parent_inner, parent, creds);
            let mut space = AddressSpace::new(self.frames.clone(), self.swap.clone());
            space.set_memory_limit(inner.limits.max_memory);
            Ok((inner, space))
        })?;
        debug!("{} created '{}' under {}", child.id(), name, parent);
        Ok(child.id())
    }

    /// Create a process with one started thread at `entry`
    pub fn process_spawn(&self, name: &str, parent: Pid, entry: u64, arg: u64) -> KernelResult<(Pid, Tid)> {
        let pid = self.process_create(name, parent)?;
        let tid = match self.thread_create(pid, entry, arg, 0) {
            Ok(tid) => tid,
            Err(err) => {
                self.discard_embryo(pid);
                return Err(err);
            }
        };
        self.start_thread(tid)?;
        Ok((pid, tid))
    }

    /// Undo `process_create` for a process that never got a thread
    fn discard_embryo(&self, pid: Pid) {
        let mut registry = self.processes.write();
        let Some(process) = registry.remove(pid.handle()) else { return };
        let ppid = process.inner.lock().ppid;
        if let Some(parent) = ppid.and_then(|ppid| registry.get(ppid.handle())) {
            parent.inner.lock().children.retain(|child| *child != pid);
        }
        process.space.lock().destroy();
    }

    /// `process_exit`: record `status` and terminate every thread
    ///
    /// The first exit wins; later calls are no-ops. The process becomes a
    /// Zombie when its last thread is gone.
    pub fn process_exit(&self, pid: Pid, status: ExitStatus) -> KernelResult<()> {
        let process = self.process(pid)?;
        if process.is_kernel() {
            return Err(KernelError::PermissionDenied);
        }
        let threads = {
            let mut inner = process.inner.lock();
            if inner.exit.is_some() {
                return Ok(());
            }
            inner.exit = Some(status);
            inner.state = ProcessState::Exiting;
            inner.threads.clone()
        };
        info!("{} exiting ({:?})", pid, status);
        if threads.is_empty() {
            self.finalize_process(&process);
            return Ok(());
        }

        // The thread running this call goes last: on hardware its
        // termination never returns
        let here = self.current_thread(self.cpu_id());
        let (own, others): (Vec<Tid>, Vec<Tid>) = threads.into_iter().partition(|tid| Some(*tid) == here);
        for tid in others.into_iter().chain(own) {
            if let Ok(thread) = self.thread(tid) {
                self.terminate_thread(&thread);
            }
        }
        Ok(())
    }

    /// Last thread gone: Zombie, orphans to init, resources released,
    /// parent notified
    pub(crate) fn finalize_process(&self, process: &Arc<Process>) {
        let pid = process.id();
        let init = self.init_pid();
        let (ppid, status, zombie_orphans) = {
            let registry = self.processes.write();
            let (ppid, status, children) = {
                let mut inner = process.inner.lock();
                inner.state = ProcessState::Zombie;
                let status = *inner.exit.get_or_insert(ExitStatus::Exited(0));
                (inner.ppid, status, core::mem::take(&mut inner.children))
            };
            let mut zombie_orphans = false;
            if !children.is_empty() {
                match registry.get(init.handle()).filter(|_| pid != init) {
                    Some(init_process) => {
                        for child_pid in &children {
                            if let Some(child) = registry.get(child_pid.handle()) {
                                let mut child_inner = child.inner.lock();
                                child_inner.ppid = Some(init);
                                zombie_orphans |= child_inner.state == ProcessState::Zombie;
                            }
                        }
                        init_process.inner.lock().children.extend(children.iter().copied());
                        debug!("{} orphans reparented to {}", children.len(), init);
                    }
                    None => warn!("{} exited with {} children and no init to adopt them", pid, children.len()),
                }
            }
            (ppid, status, zombie_orphans)
        };

        process.space.lock().destroy();
        let handles = core::mem::take(&mut process.inner.lock().handles);
        self.release_handles(handles);

        if zombie_orphans {
            if let Ok(init_process) = self.process(init) {
                self.wake_all(init_process.child_exit());
            }
        }
        if let Some(parent) = ppid.and_then(|ppid| self.process(ppid).ok()) {
            self.wake_all(parent.child_exit());
            let info = SigInfo::child(SIGCHLD, pid, status.code());
            let _ = self.signal_to_process(parent.id(), SIGCHLD, Some(info));
        }
        info!("{} is a zombie ({:?})", pid, status);
    }

    /// `process_wait`: reap a Zombie child matching `selector`
    ///
    /// `NoChild` when no child matches at all. Restartable: after
    /// `Blocked`, re-issue the call once the thread runs again.
    pub fn process_wait(&self, tid: Tid, selector: WaitSelector, timeout: Timeout) -> KernelResult<Progress<ExitInfo>> {
        let thread = self.thread(tid)?;
        let parent = self.process(thread.pid())?;
        let queue = parent.child_exit();
        let deadline = self.resume_wait(&thread, queue.id(), timeout)?;

        {
            let mut registry = self.processes.write();
            let mut inner = parent.inner.lock();
            let mut matched = false;
            let mut zombie = None;
            for child_pid in &inner.children {
                let Some(child) = registry.get(child_pid.handle()) else { continue };
                let child_inner = child.inner.lock();
                let selected = match selector {
                    WaitSelector::Any => true,
                    WaitSelector::Pid(pid) => pid == *child_pid,
                    WaitSelector::Group(pgid) => pgid == child_inner.pgid,
                };
                if !selected {
                    continue;
                }
                matched = true;
                if child_inner.state == ProcessState::Zombie {
                    zombie = child_inner.exit.map(|status| ExitInfo { pid: *child_pid, status });
                    break;
                }
            }

            if let Some(exit) = zombie {
                inner.children.retain(|child| *child != exit.pid);
                registry.remove(exit.pid.handle());
                info!("{} reaped by {} ({:?})", exit.pid, parent.id(), exit.status);
                return Ok(Progress::Done(exit));
            }
            if !matched {
                return Err(KernelError::NoChild);
            }
            if timeout.is_poll() {
                return Err(KernelError::WouldBlock);
            }
            self.prepare_wait(&thread, Some(queue), WaitReason::ChildExit, deadline)?;
        }
        self.block_thread(&thread);
        Ok(Progress::Blocked)
    }

    /// `fork_like`: duplicate the caller's process with copy-on-write memory
    ///
    /// The child has one thread cloned from `tid` whose syscall return value
    /// is 0. Handles are shared per their sharing rules. Nothing is created
    /// if any allocation fails.
    pub fn fork_like(&self, tid: Tid) -> KernelResult<Pid> {
        let thread = self.thread(tid)?;
        let parent = self.process(thread.pid())?;
        if parent.is_kernel() {
            return Err(KernelError::PermissionDenied);
        }

        let kernel_stack = KernelStack::new(&self.frames, self.config.kernel_stack_size)?;
        let child = self.install_child(&parent, |parent_inner| {
            let space = parent.space.lock().clone_cow()?;
            let inner = ProcessInner {
                name: parent_inner.name.clone(),
                cmdline: parent_inner.cmdline.clone(),
                ppid: Some(parent.id()),
                pgid: parent_inner.pgid,
                state: ProcessState::Running,
                threads: Vec::new(),
                main: None,
                children: Vec::new(),
                creds: parent_inner.creds.clone(),
                limits: parent_inner.limits.clone(),
                exit: None,
                handles: parent_inner.handles.fork(),
                signals: parent_inner.signals.clone(),
                default_params: parent_inner.default_params,
                retired_voluntary: 0,
                retired_involuntary: 0,
            };
            Ok((inner, space))
        })?;

        let mut context = thread.context();
        context.set_return_value(0);
        let sched = {
            let parent_sched = thread.sched.lock();
            let mut sched = SchedEntity::new(parent_sched.params, &self.config);
            sched.affinity = parent_sched.affinity;
            sched
        };
        let seed = ThreadSeed {
            name: thread.name().to_string(),
            pid: child.id(),
            process: Arc::downgrade(&child),
            kind: ThreadKind::User,
            context,
            kernel_stack,
            user_stack: thread.user_stack(),
            space_root: child.space.lock().root(),
            sched,
            signals: thread.signals.lock().forked(),
            now: self.now(),
        };
        let child_thread = {
            let mut inner = child.inner.lock();
            self.install_thread(&mut inner, seed)?
        };
        self.make_ready(&child_thread)?;
        info!("{} forked {} (thread {})", parent.id(), child.id(), child_thread.id());
        Ok(child.id())
    }

    /// Replace the calling process's image
    ///
    /// Builds the new address space first; on failure the old image is
    /// untouched. On success other threads are terminated, custom handlers
    /// revert to default (mask and pending signals stay) and `tid` restarts
    /// at the image entry.
    pub fn process_exec(&self, tid: Tid, image: ExecImage) -> KernelResult<()> {
        let thread = self.thread(tid)?;
        let process = self.process(thread.pid())?;
        if process.is_kernel() {
            return Err(KernelError::PermissionDenied);
        }

        let limits = process.limits();
        let mut space = AddressSpace::new(self.frames.clone(), self.swap.clone());
        space.set_memory_limit(limits.max_memory);
        for segment in &image.segments {
            let start = page_align_down(segment.vaddr);
            let end = segment
                .vaddr
                .checked_add(segment.mem_size as u64)
                .filter(|end| *end <= USER_TOP)
                .map(page_align_up)
                .ok_or(KernelError::InvalidArgument)?;
            let size = (end - start) as usize;
            let kind = if segment.prot.contains(Protection::EXEC) { RegionKind::Code } else { RegionKind::Data };
            let backing = match &segment.file {
                Some((store, offset)) => {
                    if start != segment.vaddr {
                        return Err(KernelError::InvalidArgument);
                    }
                    Backing::File { store: store.clone(), offset: *offset }
                }
                None => Backing::Anonymous,
            };
            space.map(start, size, segment.prot, kind, backing)?;
        }
        let stack_size = self.user_stack_size(image.stack_size);
        let stack_base = space.map_anywhere(stack_size, Protection::RW, RegionKind::Stack, Backing::Anonymous)?;
        let user_stack = UserStack { base: stack_base, size: stack_size };
        let root = space.root();

        // Point of no return
        for other in process.threads().into_iter().filter(|other| *other != tid) {
            if let Ok(other) = self.thread(other) {
                self.terminate_thread(&other);
            }
        }
        let mut old = core::mem::replace(&mut *process.space.lock(), space);
        old.destroy();
        {
            let mut inner = process.inner.lock();
            inner.name = image.name.clone();
            inner.cmdline = image.argv.clone();
            inner.signals.reset_handlers();
            inner.main = Some(tid);
        }
        thread.signals.lock().clear_frames();
        thread.set_user_stack(Some(user_stack));
        thread.set_space_root(root);
        thread.set_context(crate::arch::CpuContext::new_user(image.entry, user_stack.top(), 0));
        if thread.state() == ThreadState::Running {
            if let Some(cpu) = thread.last_cpu() {
                self.activate_on(cpu, root);
            }
        }
        info!("{} exec '{}' entry {:#x}", process.id(), image.name, image.entry);
        Ok(())
    }

    /// Move `pid` into process group `pgid` (`None` = its own group)
    ///
    /// Allowed on the caller itself and its children; the group must exist
    /// unless it is the target's own id.
    pub fn set_pgid(&self, caller: Pid, target: Pid, pgid: Option<Pid>) -> KernelResult<()> {
        let process = self.process(target)?;
        if target != caller && process.ppid() != Some(caller) {
            return Err(KernelError::PermissionDenied);
        }
        let pgid = pgid.unwrap_or(target);
        if pgid != target {
            let exists = self.processes.read().iter().any(|(_, other)| other.pgid() == pgid);
            if !exists {
                return Err(KernelError::PermissionDenied);
            }
        }
        process.inner.lock().pgid = pgid;
        Ok(())
    }

    pub fn set_uid(&self, pid: Pid, uid: u32) -> KernelResult<()> {
        self.process(pid)?.inner.lock().creds.set_uid(uid)
    }

    pub fn set_euid(&self, pid: Pid, euid: u32) -> KernelResult<()> {
        self.process(pid)?.inner.lock().creds.set_euid(euid)
    }

    pub fn set_gid(&self, pid: Pid, gid: u32) -> KernelResult<()> {
        self.process(pid)?.inner.lock().creds.set_gid(gid)
    }

    /// Register a fully built thread with its process and the registry
    pub(crate) fn install_thread(&self, inner: &mut ProcessInner, seed: ThreadSeed) -> KernelResult<Arc<Thread>> {
        let thread = {
            let mut registry = self.threads.write();
            let handle = registry.insert_with(|handle| Arc::new(Thread::new(Tid::new(handle), seed)));
            registry.get(handle).cloned().ok_or(KernelError::NoSuchThread)?
        };
        inner.threads.push(thread.id());
        if inner.main.is_none() {
            inner.main = Some(thread.id());
        }
        Ok(thread)
    }

    /// Page size rounded user stack size, 0 meaning the default
    pub(crate) fn user_stack_size(&self, requested: usize) -> usize {
        match requested {
            0 => self.config.user_stack_size,
            size => size.div_ceil(PAGE_SIZE) * PAGE_SIZE,
        }
    }
}
