//! IPC operations
//!
//! Blocking calls follow the restartable protocol of [`crate::sync`]: the
//! condition is checked and the wait registered under the object's lock,
//! the thread blocks after the lock is dropped, and the re-issued call
//! first reads how the wait ended. An interrupted or timed-out call never
//! consumes a message, a count or pipe data.

use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, trace};

use super::{
    HandleTable, IpcHandle, IpcObject, MessageQueue, Message, Pipe, ReceivedMessage, Semaphore, SharedSegment,
    MQ_PRIO_MAX,
};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::memory::{Protection, RegionKind};
use crate::process::{Capabilities, Credentials, Pid, Process};
use crate::signal::{SigInfo, SIGPIPE};
use crate::sync::{Progress, WaitReason};
use crate::thread::{Thread, Tid};
use crate::time::Timeout;

impl IpcObject {
    fn queue(&self) -> Option<&Arc<MessageQueue>> {
        match self {
            IpcObject::MessageQueue(queue) => Some(queue),
            _ => None,
        }
    }

    fn semaphore(&self) -> Option<&Arc<Semaphore>> {
        match self {
            IpcObject::Semaphore(sem) => Some(sem),
            _ => None,
        }
    }

    fn segment(&self) -> Option<&Arc<SharedSegment>> {
        match self {
            IpcObject::SharedMemory(segment) => Some(segment),
            _ => None,
        }
    }

    fn read_end(&self) -> Option<&Arc<Pipe>> {
        match self {
            IpcObject::PipeReader(end) => Some(end.pipe()),
            _ => None,
        }
    }

    fn write_end(&self) -> Option<&Arc<Pipe>> {
        match self {
            IpcObject::PipeWriter(end) => Some(end.pipe()),
            _ => None,
        }
    }
}

/// Named objects open to their creator's euid and to `IPC_OWNER`
fn check_owner(creds: &Credentials, owner: u32) -> KernelResult<()> {
    if creds.euid == owner || creds.has(Capabilities::IPC_OWNER) {
        Ok(())
    } else {
        Err(KernelError::PermissionDenied)
    }
}

impl Kernel {
    fn ipc_process(&self, pid: Pid) -> KernelResult<Arc<Process>> {
        let process = self.process(pid)?;
        if process.is_kernel() || process.has_exited() {
            return Err(KernelError::NoSuchProcess);
        }
        Ok(process)
    }

    fn ipc_caller(&self, tid: Tid) -> KernelResult<(Arc<Thread>, Arc<Process>)> {
        let thread = self.thread(tid)?;
        let process = self.ipc_process(thread.pid())?;
        Ok((thread, process))
    }

    /// Resolve `handle` and pick the expected kind out of it
    fn ipc_lookup<T>(
        &self,
        process: &Process,
        handle: IpcHandle,
        pick: impl FnOnce(&IpcObject) -> Option<&Arc<T>>,
    ) -> KernelResult<Arc<T>> {
        let inner = process.inner.lock();
        pick(inner.handles.get(handle)?).cloned().ok_or(KernelError::InvalidArgument)
    }

    fn install_handle(&self, process: &Process, object: IpcObject) -> KernelResult<IpcHandle> {
        let handle = process.inner.lock().handles.insert(object)?;
        trace!("{} opened {}", process.id(), handle);
        Ok(handle)
    }

    // ── Message queues ──────────────────────────────────────────────────

    /// `mq_create`: a new queue, optionally under a system-wide name
    ///
    /// `capacity` and `max_message` of 0 take the configured defaults.
    pub fn mq_create(&self, pid: Pid, name: Option<&str>, capacity: usize, max_message: usize) -> KernelResult<IpcHandle> {
        let process = self.ipc_process(pid)?;
        process.inner.lock().handles.reserve(1)?;
        let capacity = if capacity == 0 { self.config.mq_capacity } else { capacity };
        let max_message = if max_message == 0 { self.config.mq_max_message } else { max_message };
        let owner = process.credentials().euid;
        let queue = Arc::new(MessageQueue::new(capacity, max_message, name.map(ToString::to_string), owner));
        if let Some(name) = name {
            self.ipc.register_queue(name, queue.clone())?;
        }
        match self.install_handle(&process, IpcObject::MessageQueue(queue)) {
            Ok(handle) => {
                debug!("{} created queue {:?} ({} x {} bytes)", pid, name, capacity, max_message);
                Ok(handle)
            }
            Err(err) => {
                if let Some(name) = name {
                    let _ = self.ipc.unlink_queue(name);
                }
                Err(err)
            }
        }
    }

    /// `mq_open`: a handle to a named queue
    pub fn mq_open(&self, pid: Pid, name: &str) -> KernelResult<IpcHandle> {
        let process = self.ipc_process(pid)?;
        let queue = self.ipc.lookup_queue(name)?;
        check_owner(&process.credentials(), queue.owner())?;
        self.install_handle(&process, IpcObject::MessageQueue(queue))
    }

    /// `mq_unlink`: drop the name; open handles keep working
    pub fn mq_unlink(&self, pid: Pid, name: &str) -> KernelResult<()> {
        let process = self.ipc_process(pid)?;
        let queue = self.ipc.lookup_queue(name)?;
        check_owner(&process.credentials(), queue.owner())?;
        self.ipc.unlink_queue(name).map(drop)
    }

    /// Largest payload the queue behind `handle` accepts
    pub fn mq_message_limit(&self, tid: Tid, handle: IpcHandle) -> KernelResult<usize> {
        let (_, process) = self.ipc_caller(tid)?;
        Ok(self.ipc_lookup(&process, handle, IpcObject::queue)?.max_message())
    }

    /// `mq_send`: enqueue `payload` at `priority`
    ///
    /// Waits for room unless `timeout` is `Poll`. Wakes one receiver.
    pub fn mq_send(
        &self,
        tid: Tid,
        handle: IpcHandle,
        payload: &[u8],
        priority: u32,
        timeout: Timeout,
    ) -> KernelResult<Progress<()>> {
        let (thread, process) = self.ipc_caller(tid)?;
        let queue = self.ipc_lookup(&process, handle, IpcObject::queue)?;
        if priority >= MQ_PRIO_MAX {
            return Err(KernelError::InvalidArgument);
        }
        if payload.len() > queue.max_message() {
            return Err(KernelError::MessageTooBig);
        }
        let deadline = self.resume_wait(&thread, queue.senders.id(), timeout)?;
        {
            let mut state = queue.state();
            if state.is_full() {
                if timeout.is_poll() {
                    return Err(KernelError::WouldBlock);
                }
                self.prepare_wait(&thread, Some(&queue.senders), WaitReason::MessageSend, deadline)?;
                drop(state);
                self.block_thread(&thread);
                return Ok(Progress::Blocked);
            }
            state.push(Message {
                priority,
                sender: process.id(),
                timestamp: self.now(),
                payload: payload.to_vec(),
            })?;
        }
        process.add_io(payload.len());
        self.wake_one(&queue.receivers);
        Ok(Progress::Done(()))
    }

    /// `mq_receive`: dequeue the head message into `buf`
    ///
    /// Waits for a message unless `timeout` is `Poll`. Wakes one sender
    /// whenever one is waiting for room.
    pub fn mq_receive(
        &self,
        tid: Tid,
        handle: IpcHandle,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> KernelResult<Progress<ReceivedMessage>> {
        let (thread, process) = self.ipc_caller(tid)?;
        let queue = self.ipc_lookup(&process, handle, IpcObject::queue)?;
        let deadline = self.resume_wait(&thread, queue.receivers.id(), timeout)?;
        let received = {
            let mut state = queue.state();
            if state.is_empty() {
                if timeout.is_poll() {
                    return Err(KernelError::WouldBlock);
                }
                self.prepare_wait(&thread, Some(&queue.receivers), WaitReason::MessageReceive, deadline)?;
                drop(state);
                self.block_thread(&thread);
                return Ok(Progress::Blocked);
            }
            state.pop_into(buf)?
        };
        process.add_io(received.len);
        if !queue.senders.is_empty() {
            self.wake_one(&queue.senders);
        }
        Ok(Progress::Done(received))
    }

    // ── Semaphores ──────────────────────────────────────────────────────

    pub fn sem_create(&self, pid: Pid, initial: u32) -> KernelResult<IpcHandle> {
        let process = self.ipc_process(pid)?;
        self.install_handle(&process, IpcObject::Semaphore(Arc::new(Semaphore::new(initial))))
    }

    /// `sem_wait`: take one count, waiting for a post unless `Poll`
    pub fn sem_wait(&self, tid: Tid, handle: IpcHandle, timeout: Timeout) -> KernelResult<Progress<()>> {
        let (thread, process) = self.ipc_caller(tid)?;
        let sem = self.ipc_lookup(&process, handle, IpcObject::semaphore)?;
        let deadline = self.resume_wait(&thread, sem.waiters.id(), timeout)?;
        let mut state = sem.state();
        if state.try_acquire() {
            return Ok(Progress::Done(()));
        }
        if timeout.is_poll() {
            return Err(KernelError::WouldBlock);
        }
        self.prepare_wait(&thread, Some(&sem.waiters), WaitReason::Semaphore, deadline)?;
        drop(state);
        self.block_thread(&thread);
        Ok(Progress::Blocked)
    }

    /// `sem_post`: add one count and wake the best waiter
    pub fn sem_post(&self, pid: Pid, handle: IpcHandle) -> KernelResult<()> {
        let process = self.ipc_process(pid)?;
        let sem = self.ipc_lookup(&process, handle, IpcObject::semaphore)?;
        sem.state().release()?;
        self.wake_one(&sem.waiters);
        Ok(())
    }

    pub fn sem_value(&self, pid: Pid, handle: IpcHandle) -> KernelResult<u32> {
        let process = self.ipc_process(pid)?;
        Ok(self.ipc_lookup(&process, handle, IpcObject::semaphore)?.value())
    }

    // ── Shared memory ───────────────────────────────────────────────────

    /// `shm_create`: allocate a segment of `size` bytes
    pub fn shm_create(&self, pid: Pid, name: Option<&str>, size: usize) -> KernelResult<IpcHandle> {
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let process = self.ipc_process(pid)?;
        process.inner.lock().handles.reserve(1)?;
        let owner = process.credentials().euid;
        let segment = Arc::new(SharedSegment::new(&self.frames, size, name.map(ToString::to_string), owner)?);
        if let Some(name) = name {
            self.ipc.register_segment(name, segment.clone())?;
        }
        match self.install_handle(&process, IpcObject::SharedMemory(segment)) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                if let Some(name) = name {
                    let _ = self.ipc.unlink_segment(name);
                }
                Err(err)
            }
        }
    }

    pub fn shm_open(&self, pid: Pid, name: &str) -> KernelResult<IpcHandle> {
        let process = self.ipc_process(pid)?;
        let segment = self.ipc.lookup_segment(name)?;
        check_owner(&process.credentials(), segment.owner())?;
        self.install_handle(&process, IpcObject::SharedMemory(segment))
    }

    pub fn shm_unlink(&self, pid: Pid, name: &str) -> KernelResult<()> {
        let process = self.ipc_process(pid)?;
        let segment = self.ipc.lookup_segment(name)?;
        check_owner(&process.credentials(), segment.owner())?;
        self.ipc.unlink_segment(name).map(drop)
    }

    /// `shm_attach`: map the whole segment; returns its base address
    pub fn shm_attach(&self, pid: Pid, handle: IpcHandle, prot: Protection) -> KernelResult<u64> {
        let process = self.ipc_process(pid)?;
        let segment = self.ipc_lookup(&process, handle, IpcObject::segment)?;
        let base = process
            .space
            .lock()
            .map_anywhere(segment.mapped_size(), prot, RegionKind::Shared, segment.backing())?;
        debug!("{} attached segment #{} at {:#x}", pid, segment.id(), base);
        Ok(base)
    }

    /// `shm_detach`: unmap the segment mapped at `addr`
    pub fn shm_detach(&self, pid: Pid, addr: u64) -> KernelResult<()> {
        let process = self.ipc_process(pid)?;
        let mut space = process.space.lock();
        match space.region_at(addr) {
            Some(region) if region.start == addr && region.kind == RegionKind::Shared => {}
            _ => return Err(KernelError::InvalidArgument),
        }
        space.unmap(addr)?;
        Ok(())
    }

    // ── Pipes ───────────────────────────────────────────────────────────

    /// `pipe_create`: returns (read handle, write handle)
    pub fn pipe_create(&self, pid: Pid) -> KernelResult<(IpcHandle, IpcHandle)> {
        let process = self.ipc_process(pid)?;
        let (reader, writer) = Pipe::new(self.config.pipe_capacity);
        let mut inner = process.inner.lock();
        inner.handles.reserve(2)?;
        let read = inner.handles.insert(IpcObject::PipeReader(reader))?;
        let write = inner.handles.insert(IpcObject::PipeWriter(writer))?;
        Ok((read, write))
    }

    /// `pipe_read`: up to `buf.len()` bytes; 0 at EOF or for an empty `buf`
    pub fn pipe_read(&self, tid: Tid, handle: IpcHandle, buf: &mut [u8], timeout: Timeout) -> KernelResult<Progress<usize>> {
        let (thread, process) = self.ipc_caller(tid)?;
        let pipe = self.ipc_lookup(&process, handle, IpcObject::read_end)?;
        if buf.is_empty() {
            return Ok(Progress::Done(0));
        }
        let deadline = self.resume_wait(&thread, pipe.readable.id(), timeout)?;
        let count = {
            let mut state = pipe.state();
            if state.is_empty() {
                if state.writers() == 0 {
                    return Ok(Progress::Done(0));
                }
                if timeout.is_poll() {
                    return Err(KernelError::WouldBlock);
                }
                self.prepare_wait(&thread, Some(&pipe.readable), WaitReason::PipeRead, deadline)?;
                drop(state);
                self.block_thread(&thread);
                return Ok(Progress::Blocked);
            }
            state.read(buf)
        };
        process.add_io(count);
        self.wake_all(&pipe.writable);
        Ok(Progress::Done(count))
    }

    /// `pipe_write`: as many bytes as fit, waiting while the pipe is full
    ///
    /// With no reader left the caller gets SIGPIPE and `BrokenPipe`.
    pub fn pipe_write(&self, tid: Tid, handle: IpcHandle, data: &[u8], timeout: Timeout) -> KernelResult<Progress<usize>> {
        let (thread, process) = self.ipc_caller(tid)?;
        let pipe = self.ipc_lookup(&process, handle, IpcObject::write_end)?;
        if data.is_empty() {
            return Ok(Progress::Done(0));
        }
        let deadline = self.resume_wait(&thread, pipe.writable.id(), timeout)?;
        let count = {
            let mut state = pipe.state();
            if state.readers() == 0 {
                drop(state);
                let _ = self.signal_to_thread(tid, SIGPIPE, Some(SigInfo::kernel(SIGPIPE)));
                return Err(KernelError::BrokenPipe);
            }
            if state.space() == 0 {
                if timeout.is_poll() {
                    return Err(KernelError::WouldBlock);
                }
                self.prepare_wait(&thread, Some(&pipe.writable), WaitReason::PipeWrite, deadline)?;
                drop(state);
                self.block_thread(&thread);
                return Ok(Progress::Blocked);
            }
            state.write(data)
        };
        process.add_io(count);
        self.wake_all(&pipe.readable);
        Ok(Progress::Done(count))
    }

    // ── Handles ─────────────────────────────────────────────────────────

    /// `close_handle`
    pub fn close_handle(&self, pid: Pid, handle: IpcHandle) -> KernelResult<()> {
        let process = self.process(pid)?;
        let object = process.inner.lock().handles.remove(handle)?;
        trace!("{} closed {} ({:?})", pid, handle, object);
        self.release_object(object);
        Ok(())
    }

    /// Open handles of `pid`, ascending
    pub fn ipc_handles(&self, pid: Pid) -> KernelResult<Vec<IpcHandle>> {
        Ok(self.process(pid)?.inner.lock().handles.handles())
    }

    /// Drop every handle of an exiting process
    pub(crate) fn release_handles(&self, mut handles: HandleTable) {
        for object in handles.drain() {
            self.release_object(object);
        }
    }

    /// Drop one reference; a closed pipe end wakes the other side
    fn release_object(&self, object: IpcObject) {
        match object {
            IpcObject::PipeReader(end) => {
                let pipe = end.pipe().clone();
                drop(end);
                self.wake_all(&pipe.writable);
            }
            IpcObject::PipeWriter(end) => {
                let pipe = end.pipe().clone();
                drop(end);
                self.wake_all(&pipe.readable);
            }
            other => drop(other),
        }
    }
}
