//! IPC primitives
//!
//! Priority message queues, shared-memory segments, counting semaphores and
//! pipes. A process reaches them through [`IpcHandle`]s in its
//! [`HandleTable`]; the objects themselves are reference counted and may be
//! held by several processes (fork, named open).

pub mod message_queue;
mod namespace;
mod ops;
pub mod pipe;
pub mod semaphore;
pub mod shared_memory;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;

use crate::error::{KernelError, KernelResult};

pub use message_queue::{Message, MessageQueue, ReceivedMessage, MQ_PRIO_MAX};
pub use namespace::IpcNamespace;
pub use pipe::{Pipe, PipeReader, PipeWriter};
pub use semaphore::{Semaphore, SEM_VALUE_MAX};
pub use shared_memory::SharedSegment;

/// Global object ids (diagnostics only; processes see handles)
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-process IPC handle
///
/// Allocated from a per-process counter that never goes back, so a closed
/// handle is never reissued by the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpcHandle(pub u64);

impl fmt::Display for IpcHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Kind of object behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcKind {
    MessageQueue,
    SharedMemory,
    Semaphore,
    PipeReader,
    PipeWriter,
}

/// Object referenced by a handle
#[derive(Clone)]
pub enum IpcObject {
    MessageQueue(Arc<MessageQueue>),
    SharedMemory(Arc<SharedSegment>),
    Semaphore(Arc<Semaphore>),
    PipeReader(PipeReader),
    PipeWriter(PipeWriter),
}

impl IpcObject {
    pub fn kind(&self) -> IpcKind {
        match self {
            IpcObject::MessageQueue(_) => IpcKind::MessageQueue,
            IpcObject::SharedMemory(_) => IpcKind::SharedMemory,
            IpcObject::Semaphore(_) => IpcKind::Semaphore,
            IpcObject::PipeReader(_) => IpcKind::PipeReader,
            IpcObject::PipeWriter(_) => IpcKind::PipeWriter,
        }
    }
}

impl fmt::Debug for IpcObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcObject::MessageQueue(queue) => write!(f, "MessageQueue#{}", queue.id()),
            IpcObject::SharedMemory(segment) => write!(f, "SharedMemory#{}", segment.id()),
            IpcObject::Semaphore(sem) => write!(f, "Semaphore#{}", sem.id()),
            IpcObject::PipeReader(end) => write!(f, "PipeReader#{}", end.pipe().id()),
            IpcObject::PipeWriter(end) => write!(f, "PipeWriter#{}", end.pipe().id()),
        }
    }
}

/// Open IPC handles of one process
#[derive(Debug)]
pub struct HandleTable {
    entries: HashMap<IpcHandle, IpcObject>,
    next: u64,
    limit: usize,
}

impl HandleTable {
    pub fn new(limit: usize) -> Self {
        Self { entries: HashMap::new(), next: 1, limit }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Room for `count` more handles under the open-files limit
    pub fn reserve(&self, count: usize) -> KernelResult<()> {
        if self.entries.len() + count > self.limit {
            return Err(KernelError::LimitExceeded);
        }
        Ok(())
    }

    pub fn insert(&mut self, object: IpcObject) -> KernelResult<IpcHandle> {
        self.reserve(1)?;
        let handle = IpcHandle(self.next);
        self.next += 1;
        self.entries.insert(handle, object);
        Ok(handle)
    }

    pub fn get(&self, handle: IpcHandle) -> KernelResult<&IpcObject> {
        self.entries.get(&handle).ok_or(KernelError::NoSuchObject)
    }

    pub fn remove(&mut self, handle: IpcHandle) -> KernelResult<IpcObject> {
        self.entries.remove(&handle).ok_or(KernelError::NoSuchObject)
    }

    /// Handles in ascending order
    pub fn handles(&self) -> Vec<IpcHandle> {
        let mut handles: Vec<IpcHandle> = self.entries.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Copy for a forked child: same handle numbers, same objects
    ///
    /// Pipe ends are cloned, which counts the child as another reader or
    /// writer.
    pub fn fork(&self) -> Self {
        Self { entries: self.entries.clone(), next: self.next, limit: self.limit }
    }

    /// Empty the table, returning every object in handle order
    pub fn drain(&mut self) -> Vec<IpcObject> {
        let mut entries: Vec<(IpcHandle, IpcObject)> = self.entries.drain().collect();
        entries.sort_by_key(|(handle, _)| *handle);
        entries.into_iter().map(|(_, object)| object).collect()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new(0)
    }
}
