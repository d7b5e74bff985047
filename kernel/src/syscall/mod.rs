//! System call ABI
//!
//! Stable numeric table. The architecture entry stub collects the number
//! and six argument registers and calls [`Kernel::syscall`]; the result is
//! written to the caller's return register and pending signals are handled
//! before the thread goes back to user mode.
//!
//! Blocking calls are restartable. On [`SyscallReturn::Blocked`] the stub
//! leaves the instruction pointer on the syscall instruction, so the same
//! call is issued again when the thread next runs and then observes how its
//! wait ended (`Timeout`, `Interrupted`, or success).

pub mod user;

use log::trace;

use crate::error::{KernelError, KernelResult};
use crate::ipc::IpcHandle;
use crate::kernel::Kernel;
use crate::memory::Protection;
use crate::process::{Capabilities, ExitStatus, Pid, Process, WaitSelector};
use crate::sched::CpuMask;
use crate::signal::{MaskHow, RawSigAction, SigSet, SignalTarget};
use crate::sync::Progress;
use crate::thread::Tid;
use crate::time::{Duration, Timeout};

pub use user::{RawExitInfo, RawSchedParams, MAX_USER_COPY};

/// Syscall numbers
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syscall {
    // Threads and processes
    SpawnThread = 1,
    ExitThread = 2,
    ExitProcess = 3,
    WaitProcess = 4,
    Fork = 5,
    GetPid = 6,
    GetPpid = 7,
    GetTid = 8,
    SetPgid = 9,
    SetUid = 10,
    SetEuid = 11,
    SetGid = 12,

    // Signals
    SendSignal = 20,
    SigAction = 21,
    SigProcMask = 22,
    SigPending = 23,
    SigReturn = 24,
    Tkill = 25,

    // Scheduling and time
    Sleep = 30,
    Yield = 31,
    SetSchedParams = 32,
    SetAffinity = 33,

    // IPC
    MqCreate = 40,
    MqOpen = 41,
    MqUnlink = 42,
    MqSend = 43,
    MqRecv = 44,
    SemCreate = 45,
    SemWait = 46,
    SemPost = 47,
    ShmCreate = 48,
    ShmOpen = 49,
    ShmUnlink = 50,
    ShmAttach = 51,
    ShmDetach = 52,
    PipeCreate = 53,
    PipeRead = 54,
    PipeWrite = 55,
    Close = 56,

    // Memory
    Mmap = 60,
    Munmap = 61,
}

impl Syscall {
    pub fn from_raw(nr: u64) -> Option<Self> {
        use Syscall::*;
        Some(match nr {
            1 => SpawnThread,
            2 => ExitThread,
            3 => ExitProcess,
            4 => WaitProcess,
            5 => Fork,
            6 => GetPid,
            7 => GetPpid,
            8 => GetTid,
            9 => SetPgid,
            10 => SetUid,
            11 => SetEuid,
            12 => SetGid,
            20 => SendSignal,
            21 => SigAction,
            22 => SigProcMask,
            23 => SigPending,
            24 => SigReturn,
            25 => Tkill,
            30 => Sleep,
            31 => Yield,
            32 => SetSchedParams,
            33 => SetAffinity,
            40 => MqCreate,
            41 => MqOpen,
            42 => MqUnlink,
            43 => MqSend,
            44 => MqRecv,
            45 => SemCreate,
            46 => SemWait,
            47 => SemPost,
            48 => ShmCreate,
            49 => ShmOpen,
            50 => ShmUnlink,
            51 => ShmAttach,
            52 => ShmDetach,
            53 => PipeCreate,
            54 => PipeRead,
            55 => PipeWrite,
            56 => Close,
            60 => Mmap,
            61 => Munmap,
            _ => return None,
        })
    }
}

/// `send_signal` flag: the target id names a process group
pub const SIG_TARGET_GROUP: u64 = 1 << 0;
/// `send_signal` flag: argument 3 carries a payload value
pub const SIG_WITH_VALUE: u64 = 1 << 1;

/// What the entry stub does with a call's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    /// Written to the return register
    Value(u64),
    /// Written to the return register as a negative errno
    Error(KernelError),
    /// The thread is parked; re-issue the call when it runs again
    Blocked,
    /// The context was replaced or the thread is gone; write nothing
    NoReturn,
}

impl SyscallReturn {
    /// Return register value, if one is written
    pub fn to_raw(self) -> Option<u64> {
        match self {
            SyscallReturn::Value(value) => Some(value),
            SyscallReturn::Error(err) => Some(err.errno() as u64),
            SyscallReturn::Blocked | SyscallReturn::NoReturn => None,
        }
    }
}

impl From<KernelResult<u64>> for SyscallReturn {
    fn from(result: KernelResult<u64>) -> Self {
        match result {
            Ok(value) => SyscallReturn::Value(value),
            Err(err) => SyscallReturn::Error(err),
        }
    }
}

fn progress(result: KernelResult<Progress<u64>>) -> SyscallReturn {
    match result {
        Ok(Progress::Done(value)) => SyscallReturn::Value(value),
        Ok(Progress::Blocked) => SyscallReturn::Blocked,
        Err(err) => SyscallReturn::Error(err),
    }
}

fn pid_arg(raw: u64, own: Pid) -> KernelResult<Pid> {
    match raw {
        0 => Ok(own),
        raw => Pid::from_raw(raw).ok_or(KernelError::NoSuchProcess),
    }
}

fn tid_arg(raw: u64, own: Tid) -> KernelResult<Tid> {
    match raw {
        0 => Ok(own),
        raw => Tid::from_raw(raw).ok_or(KernelError::NoSuchThread),
    }
}

fn signo_arg(raw: u64) -> KernelResult<u32> {
    u32::try_from(raw).map_err(|_| KernelError::InvalidSignal)
}

fn len_arg(raw: u64) -> KernelResult<usize> {
    usize::try_from(raw).map_err(|_| KernelError::InvalidArgument)
}

impl Kernel {
    /// Syscall entry: run call `nr` for `tid` with `args`
    pub fn syscall(&self, tid: Tid, nr: u64, args: [u64; 6]) -> SyscallReturn {
        let outcome = match Syscall::from_raw(nr) {
            Some(call) => {
                trace!("{} syscall {:?} {:x?}", tid, call, args);
                self.dispatch_syscall(tid, call, args)
            }
            None => SyscallReturn::Error(KernelError::InvalidArgument),
        };
        let Ok(thread) = self.thread(tid) else { return SyscallReturn::NoReturn };
        if !thread.state().is_alive() {
            return SyscallReturn::NoReturn;
        }
        if let Some(raw) = outcome.to_raw() {
            let mut context = thread.context();
            context.set_return_value(raw);
            thread.set_context(context);
        }
        if outcome != SyscallReturn::Blocked {
            // Safe point: the return value is in place before a handler frame saves it
            let _ = self.handle_pending(tid);
        }
        outcome
    }

    fn dispatch_syscall(&self, tid: Tid, call: Syscall, a: [u64; 6]) -> SyscallReturn {
        let (pid, process) = match self.thread(tid).and_then(|thread| Ok((thread.pid(), self.process(thread.pid())?))) {
            Ok(found) => found,
            Err(err) => return SyscallReturn::Error(err),
        };
        match call {
            Syscall::SpawnThread => self.sys_spawn_thread(&process, a).into(),
            Syscall::ExitThread => {
                let _ = self.thread_exit(tid, a[0] as i32);
                SyscallReturn::NoReturn
            }
            Syscall::ExitProcess => match self.process_exit(pid, ExitStatus::Exited(a[0] as i32)) {
                Ok(()) => SyscallReturn::NoReturn,
                Err(err) => SyscallReturn::Error(err),
            },
            Syscall::WaitProcess => progress(self.sys_wait(tid, &process, a)),
            Syscall::Fork => self.fork_like(tid).map(Pid::raw).into(),
            Syscall::GetPid => SyscallReturn::Value(pid.raw()),
            Syscall::GetPpid => SyscallReturn::Value(process.ppid().map_or(0, Pid::raw)),
            Syscall::GetTid => SyscallReturn::Value(tid.raw()),
            Syscall::SetPgid => self.sys_set_pgid(pid, a).into(),
            Syscall::SetUid => self.set_uid(pid, a[0] as u32).map(|()| 0).into(),
            Syscall::SetEuid => self.set_euid(pid, a[0] as u32).map(|()| 0).into(),
            Syscall::SetGid => self.set_gid(pid, a[0] as u32).map(|()| 0).into(),

            Syscall::SendSignal => self.sys_send_signal(pid, a).into(),
            Syscall::SigAction => self.sys_sigaction(&process, a).into(),
            Syscall::SigProcMask => self.sys_sigprocmask(tid, &process, a).into(),
            Syscall::SigPending => self.sys_sigpending(tid, &process, a).into(),
            Syscall::SigReturn => match self.signal_return(tid) {
                Ok(()) => SyscallReturn::NoReturn,
                Err(err) => SyscallReturn::Error(err),
            },
            Syscall::Tkill => self.sys_tkill(pid, a).into(),

            Syscall::Sleep => progress(self.sleep(tid, Duration::from_ns(a[0])).map(|p| p.map(|()| 0))),
            Syscall::Yield => self.yield_now(tid).map(|()| 0).into(),
            Syscall::SetSchedParams => self.sys_set_sched_params(tid, &process, a).into(),
            Syscall::SetAffinity => {
                let target = match tid_arg(a[0], tid) {
                    Ok(target) => target,
                    Err(err) => return SyscallReturn::Error(err),
                };
                self.set_affinity(tid, target, CpuMask::from_bits(a[1])).map(|()| 0).into()
            }

            Syscall::MqCreate => self.sys_mq_create(pid, &process, a).into(),
            Syscall::MqOpen => self.sys_named(&process, a, |name| self.mq_open(pid, name)).into(),
            Syscall::MqUnlink => self.sys_named(&process, a, |name| self.mq_unlink(pid, name).map(|()| IpcHandle(0))).into(),
            Syscall::MqSend => progress(self.sys_mq_send(tid, &process, a)),
            Syscall::MqRecv => progress(self.sys_mq_recv(tid, &process, a)),
            Syscall::SemCreate => self.sem_create(pid, a[0] as u32).map(|h| h.0).into(),
            Syscall::SemWait => progress(self.sem_wait(tid, IpcHandle(a[0]), Timeout::from_raw(a[1])).map(|p| p.map(|()| 0))),
            Syscall::SemPost => self.sem_post(pid, IpcHandle(a[0])).map(|()| 0).into(),
            Syscall::ShmCreate => self.sys_shm_create(pid, &process, a).into(),
            Syscall::ShmOpen => self.sys_named(&process, a, |name| self.shm_open(pid, name)).into(),
            Syscall::ShmUnlink => self.sys_named(&process, a, |name| self.shm_unlink(pid, name).map(|()| IpcHandle(0))).into(),
            Syscall::ShmAttach => {
                let prot = Protection::from_bits_truncate(a[1] as u32);
                self.shm_attach(pid, IpcHandle(a[0]), prot).into()
            }
            Syscall::ShmDetach => self.shm_detach(pid, a[0]).map(|()| 0).into(),
            Syscall::PipeCreate => self.sys_pipe_create(pid, &process, a).into(),
            Syscall::PipeRead => progress(self.sys_pipe_read(tid, &process, a)),
            Syscall::PipeWrite => progress(self.sys_pipe_write(tid, &process, a)),
            Syscall::Close => self.close_handle(pid, IpcHandle(a[0])).map(|()| 0).into(),

            // (address or 0, size, protection bits)
            Syscall::Mmap => {
                let addr = (a[0] != 0).then_some(a[0]);
                let size = match len_arg(a[1]) {
                    Ok(size) => size,
                    Err(err) => return SyscallReturn::Error(err),
                };
                self.mmap(pid, addr, size, Protection::from_bits_truncate(a[2] as u32)).into()
            }
            Syscall::Munmap => self.munmap(pid, a[0]).map(|()| 0).into(),
        }
    }

    /// (pid or 0 for own process, entry, arg, stack size)
    fn sys_spawn_thread(&self, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let target = pid_arg(a[0], process.id())?;
        if target != process.id() && !process.credentials().has(Capabilities::SYS_ADMIN) {
            return Err(KernelError::PermissionDenied);
        }
        let tid = self.thread_create(target, a[1], a[2], len_arg(a[3])?)?;
        self.start_thread(tid)?;
        Ok(tid.raw())
    }

    /// (selector kind: 0 any / 1 pid / 2 group, id, timeout, *out RawExitInfo)
    fn sys_wait(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<Progress<u64>> {
        let selector = match a[0] {
            0 => WaitSelector::Any,
            1 => WaitSelector::Pid(Pid::from_raw(a[1]).ok_or(KernelError::NoChild)?),
            2 => WaitSelector::Group(pid_arg(a[1], process.pgid())?),
            _ => return Err(KernelError::InvalidArgument),
        };
        if a[3] != 0 {
            self.prepare_user_write(process, a[3], core::mem::size_of::<RawExitInfo>())?;
        }
        match self.process_wait(tid, selector, Timeout::from_raw(a[2]))? {
            Progress::Done(info) => {
                if a[3] != 0 {
                    self.write_user(process, a[3], &RawExitInfo::from(info))?;
                }
                Ok(Progress::Done(info.pid.raw()))
            }
            Progress::Blocked => Ok(Progress::Blocked),
        }
    }

    /// (target or 0, pgid or 0)
    fn sys_set_pgid(&self, pid: Pid, a: [u64; 6]) -> KernelResult<u64> {
        let target = pid_arg(a[0], pid)?;
        let pgid = match a[1] {
            0 => None,
            raw => Some(Pid::from_raw(raw).ok_or(KernelError::NoSuchProcess)?),
        };
        self.set_pgid(pid, target, pgid).map(|()| 0)
    }

    /// (target id, signal, flags, value)
    fn sys_send_signal(&self, pid: Pid, a: [u64; 6]) -> KernelResult<u64> {
        let sig = signo_arg(a[1])?;
        let target = match (a[0], a[2] & SIG_TARGET_GROUP != 0) {
            (0, true) => SignalTarget::OwnGroup,
            (raw, true) => SignalTarget::Group(Pid::from_raw(raw).ok_or(KernelError::NoSuchProcess)?),
            (raw, false) => SignalTarget::Process(Pid::from_raw(raw).ok_or(KernelError::NoSuchProcess)?),
        };
        let value = (a[2] & SIG_WITH_VALUE != 0).then_some(a[3]);
        self.signal_send(pid, target, sig, value).map(|()| 0)
    }

    /// (thread, signal); the thread must belong to a process the caller may signal
    fn sys_tkill(&self, pid: Pid, a: [u64; 6]) -> KernelResult<u64> {
        let target = Tid::from_raw(a[0]).ok_or(KernelError::NoSuchThread)?;
        let sig = signo_arg(a[1])?;
        let thread = self.thread(target)?;
        let sender = self.process(pid)?.credentials();
        let receiver = self.process(thread.pid())?.credentials();
        if !sender.can_signal(&receiver) {
            return Err(KernelError::PermissionDenied);
        }
        let uid = sender.ruid;
        self.signal_to_thread(target, sig, Some(crate::signal::SigInfo::user(sig, pid, uid))).map(|()| 0)
    }

    /// (signal, *new RawSigAction or 0, *out old or 0)
    fn sys_sigaction(&self, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let sig = signo_arg(a[0])?;
        let new = match a[1] {
            0 => None,
            addr => Some(self.read_user::<RawSigAction>(process, addr)?.to_disposition()),
        };
        let old = self.sigaction(process.id(), sig, new)?;
        if a[2] != 0 {
            self.write_user(process, a[2], &RawSigAction::from_disposition(old))?;
        }
        Ok(0)
    }

    /// (how, *new set or 0, *out old or 0)
    fn sys_sigprocmask(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let how = MaskHow::from_raw(a[0])?;
        let set = match a[1] {
            0 => None,
            addr => Some(SigSet::from_bits(self.read_user::<u64>(process, addr)?)),
        };
        let old = self.sigprocmask(tid, how, set)?;
        if a[2] != 0 {
            self.write_user(process, a[2], &old.bits())?;
        }
        Ok(0)
    }

    /// (*out set)
    fn sys_sigpending(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let pending = self.sigpending(tid)?;
        self.write_user(process, a[0], &pending.bits())?;
        Ok(0)
    }

    /// (thread or 0, *RawSchedParams)
    fn sys_set_sched_params(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let target = tid_arg(a[0], tid)?;
        let params = self.read_user::<RawSchedParams>(process, a[1])?.to_params()?;
        self.set_sched_params(tid, target, params).map(|()| 0)
    }

    /// Calls whose first two arguments are a name pointer and length
    fn sys_named(
        &self,
        process: &Process,
        a: [u64; 6],
        op: impl FnOnce(&str) -> KernelResult<IpcHandle>,
    ) -> KernelResult<u64> {
        let name = self.user_str(process, a[0], len_arg(a[1])?)?;
        op(&name).map(|handle| handle.0)
    }

    /// (*name or 0, name length, capacity, max message size)
    fn sys_mq_create(&self, pid: Pid, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let name = match a[0] {
            0 => None,
            addr => Some(self.user_str(process, addr, len_arg(a[1])?)?),
        };
        self.mq_create(pid, name.as_deref(), len_arg(a[2])?, len_arg(a[3])?).map(|h| h.0)
    }

    /// (handle, *payload, length, priority, timeout)
    fn sys_mq_send(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<Progress<u64>> {
        let len = len_arg(a[2])?;
        if len > self.mq_message_limit(tid, IpcHandle(a[0]))? {
            return Err(KernelError::MessageTooBig);
        }
        let payload = self.copy_from_user(process, a[1], len)?;
        let priority = u32::try_from(a[3]).map_err(|_| KernelError::InvalidArgument)?;
        Ok(self.mq_send(tid, IpcHandle(a[0]), &payload, priority, Timeout::from_raw(a[4]))?.map(|()| 0))
    }

    /// (handle, *buffer, length, timeout, *out priority or 0) -> message size
    fn sys_mq_recv(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<Progress<u64>> {
        let len = len_arg(a[2])?.min(MAX_USER_COPY);
        self.prepare_user_write(process, a[1], len)?;
        if a[4] != 0 {
            self.prepare_user_write(process, a[4], core::mem::size_of::<u32>())?;
        }
        let mut buf = alloc::vec![0u8; len];
        match self.mq_receive(tid, IpcHandle(a[0]), &mut buf, Timeout::from_raw(a[3]))? {
            Progress::Done(received) => {
                self.copy_to_user(process, a[1], &buf[..received.len])?;
                if a[4] != 0 {
                    self.write_user(process, a[4], &received.priority)?;
                }
                Ok(Progress::Done(received.len as u64))
            }
            Progress::Blocked => Ok(Progress::Blocked),
        }
    }

    /// (*name or 0, name length, size)
    fn sys_shm_create(&self, pid: Pid, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let name = match a[0] {
            0 => None,
            addr => Some(self.user_str(process, addr, len_arg(a[1])?)?),
        };
        self.shm_create(pid, name.as_deref(), len_arg(a[2])?).map(|h| h.0)
    }

    /// (*out [read handle, write handle])
    fn sys_pipe_create(&self, pid: Pid, process: &Process, a: [u64; 6]) -> KernelResult<u64> {
        let (read, write) = self.pipe_create(pid)?;
        if let Err(err) = self.write_user(process, a[0], &[read.0, write.0]) {
            let _ = self.close_handle(pid, read);
            let _ = self.close_handle(pid, write);
            return Err(err);
        }
        Ok(0)
    }

    /// (handle, *buffer, length, timeout) -> bytes read, 0 at EOF
    fn sys_pipe_read(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<Progress<u64>> {
        let len = len_arg(a[2])?.min(self.config.pipe_capacity);
        self.prepare_user_write(process, a[1], len)?;
        let mut buf = alloc::vec![0u8; len];
        match self.pipe_read(tid, IpcHandle(a[0]), &mut buf, Timeout::from_raw(a[3]))? {
            Progress::Done(count) => {
                self.copy_to_user(process, a[1], &buf[..count])?;
                Ok(Progress::Done(count as u64))
            }
            Progress::Blocked => Ok(Progress::Blocked),
        }
    }

    /// (handle, *data, length, timeout) -> bytes written
    fn sys_pipe_write(&self, tid: Tid, process: &Process, a: [u64; 6]) -> KernelResult<Progress<u64>> {
        let len = len_arg(a[2])?.min(self.config.pipe_capacity);
        let data = self.copy_from_user(process, a[1], len)?;
        Ok(self.pipe_write(tid, IpcHandle(a[0]), &data, Timeout::from_raw(a[3]))?.map(|count| count as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_roundtrip() {
        for nr in 0..64 {
            if let Some(call) = Syscall::from_raw(nr) {
                assert_eq!(call as u64, nr);
            }
        }
        assert_eq!(Syscall::from_raw(44), Some(Syscall::MqRecv));
        assert_eq!(Syscall::from_raw(61), Some(Syscall::Munmap));
        assert_eq!(Syscall::from_raw(0), None);
    }

    #[test]
    fn test_return_encoding() {
        assert_eq!(SyscallReturn::Value(7).to_raw(), Some(7));
        assert_eq!(SyscallReturn::Error(KernelError::Interrupted).to_raw(), Some((-4i64) as u64));
        assert_eq!(SyscallReturn::Blocked.to_raw(), None);
        assert_eq!(SyscallReturn::NoReturn.to_raw(), None);
    }
}
