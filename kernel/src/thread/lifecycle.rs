//! Thread lifecycle - create, start, exit, forced termination

use alloc::string::ToString;
use alloc::sync::Arc;
use log::{debug, trace};

use super::thread::ThreadSeed;
use super::{KernelStack, Thread, ThreadKind, ThreadState, Tid, UserStack};
use crate::arch::CpuContext;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::memory::{Backing, Protection, RegionKind};
use crate::process::{Pid, ProcessState};
use crate::sched::SchedEntity;
use crate::signal::SignalState;

impl Kernel {
    /// `thread_create`: a New thread in `pid` starting at `entry(arg)`
    ///
    /// Maps a user stack of `stack_size` bytes (0 = default) in the
    /// process address space and allocates a kernel stack. The first
    /// thread becomes the main thread. The caller starts it with
    /// [`Kernel::start_thread`]. Nothing is left behind on failure.
    pub fn thread_create(&self, pid: Pid, entry: u64, arg: u64, stack_size: usize) -> KernelResult<Tid> {
        let process = self.process(pid)?;
        if process.is_kernel() {
            return Err(KernelError::PermissionDenied);
        }
        let stack_size = self.user_stack_size(stack_size);

        let mut inner = process.inner.lock();
        if inner.exit.is_some() {
            return Err(KernelError::NoSuchProcess);
        }
        if inner.threads.len() >= inner.limits.max_threads {
            debug!("{} at thread limit {}", pid, inner.limits.max_threads);
            return Err(KernelError::LimitExceeded);
        }

        let (user_stack, space_root, kernel_stack) = {
            let mut space = process.space.lock();
            let base = space.map_anywhere(stack_size, Protection::RW, RegionKind::Stack, Backing::Anonymous)?;
            match KernelStack::new(&self.frames, self.config.kernel_stack_size) {
                Ok(kernel_stack) => (UserStack { base, size: stack_size }, space.root(), kernel_stack),
                Err(err) => {
                    let _ = space.unmap(base);
                    return Err(err.into());
                }
            }
        };

        let name = match inner.threads.len() {
            0 => inner.name.clone(),
            n => alloc::format!("{}:{}", inner.name, n),
        };
        let seed = ThreadSeed {
            name,
            pid,
            process: Arc::downgrade(&process),
            kind: ThreadKind::User,
            context: CpuContext::new_user(entry, user_stack.top(), arg),
            kernel_stack,
            user_stack: Some(user_stack),
            space_root,
            sched: SchedEntity::new(inner.default_params, &self.config),
            signals: SignalState::new(self.config.sigqueue_max),
            now: self.now(),
        };
        let thread = self.install_thread(&mut inner, seed)?;
        debug!("{} created in {} at {:#x}", thread.id(), pid, entry);
        Ok(thread.id())
    }

    /// Build a kernel-mode thread of the kernel process (idle threads)
    pub(crate) fn create_kernel_thread(&self, name: &str, entry: u64, params: crate::sched::SchedParams) -> KernelResult<Arc<Thread>> {
        let process = self.process(self.kernel_pid())?;
        let kernel_stack = KernelStack::new(&self.frames, self.config.kernel_stack_size)?;
        let mut inner = process.inner.lock();
        let seed = ThreadSeed {
            name: name.to_string(),
            pid: process.id(),
            process: Arc::downgrade(&process),
            kind: ThreadKind::Idle,
            context: CpuContext::new_kernel(entry, kernel_stack.top(), 0),
            kernel_stack,
            user_stack: None,
            space_root: crate::arch::PageTableRoot::KERNEL,
            sched: SchedEntity::new(params, &self.config),
            signals: SignalState::new(self.config.sigqueue_max),
            now: self.now(),
        };
        self.install_thread(&mut inner, seed)
    }

    /// First enqueue of a New thread
    pub fn start_thread(&self, tid: Tid) -> KernelResult<()> {
        let thread = self.thread(tid)?;
        self.make_ready(&thread)
    }

    pub(crate) fn make_ready(&self, thread: &Arc<Thread>) -> KernelResult<()> {
        let stopped = match thread.process() {
            Some(process) => {
                let mut inner = process.inner.lock();
                if inner.state == ProcessState::Embryo {
                    inner.state = ProcessState::Running;
                }
                inner.state == ProcessState::Stopped
            }
            None => false,
        };
        if stopped {
            thread.set_stopped(true);
            thread
                .state
                .transition(&[ThreadState::New], ThreadState::Ready)
                .and_then(|_| thread.state.transition(&[ThreadState::Ready], ThreadState::Suspended))
                .map_err(|_| KernelError::InvalidArgument)?;
            return Ok(());
        }
        thread
            .state
            .transition(&[ThreadState::New], ThreadState::Ready)
            .map_err(|_| KernelError::InvalidArgument)?;
        self.enqueue_thread(thread);
        Ok(())
    }

    /// `thread_exit`: terminate the calling thread with `code`
    ///
    /// When it was the process's last live thread, the process exits with
    /// `code` unless an exit status was already recorded.
    pub fn thread_exit(&self, tid: Tid, code: i32) -> KernelResult<()> {
        let thread = self.thread(tid)?;
        if thread.is_idle() {
            return Err(KernelError::PermissionDenied);
        }
        thread.set_exit_code(code as i64);
        self.terminate_thread(&thread);
        Ok(())
    }

    /// Forced or voluntary termination
    ///
    /// Cancels any wait, marks the thread Terminated, drops it from the
    /// registry and its process, and takes it off its CPU. The kernel stack
    /// goes now unless the thread is Running, in which case its CPU frees
    /// it after switching away.
    pub(crate) fn terminate_thread(&self, thread: &Arc<Thread>) {
        self.cancel_wait(thread);
        let prev = thread.state.terminate();
        if prev == ThreadState::Terminated {
            return;
        }
        trace!("{} terminated from {}", thread.id(), prev);

        self.threads.write().remove(thread.id().handle());
        let last = match thread.process() {
            Some(process) => {
                let last = {
                    let (voluntary, involuntary) = {
                        let sched = thread.sched.lock();
                        (sched.voluntary_switches, sched.involuntary_switches)
                    };
                    let mut inner = process.inner.lock();
                    inner.threads.retain(|tid| *tid != thread.id());
                    if inner.main == Some(thread.id()) {
                        inner.main = inner.threads.first().copied();
                    }
                    inner.retired_voluntary += voluntary;
                    inner.retired_involuntary += involuntary;
                    let last = inner.threads.is_empty();
                    if last && inner.exit.is_none() {
                        inner.exit = Some(crate::process::ExitStatus::Exited(thread.exit_code() as i32));
                        inner.state = ProcessState::Exiting;
                    }
                    last
                };
                last.then_some(process)
            }
            None => None,
        };
        if let Some(process) = last {
            self.finalize_process(&process);
        }

        if prev != ThreadState::Running {
            thread.release_kernel_stack();
        }
        self.deschedule(thread, prev);
    }
}
