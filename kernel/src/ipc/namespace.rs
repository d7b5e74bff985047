//! Named IPC objects
//!
//! System-wide names for message queues and shared-memory segments. A name
//! keeps its object alive until unlinked; open handles keep it alive after.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::RwLock;

use super::{MessageQueue, SharedSegment};
use crate::error::{KernelError, KernelResult};

/// Longest accepted name
pub const NAME_MAX: usize = 255;

pub fn validate_name(name: &str) -> KernelResult<()> {
    if name.is_empty() || name.len() > NAME_MAX || name.contains('\0') {
        return Err(KernelError::InvalidArgument);
    }
    Ok(())
}

struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    fn register(&self, name: &str, object: Arc<T>) -> KernelResult<()> {
        validate_name(name)?;
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(KernelError::AlreadyExists);
        }
        entries.insert(name.to_string(), object);
        Ok(())
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<T>> {
        self.entries.read().get(name).cloned().ok_or(KernelError::NoSuchObject)
    }

    fn unlink(&self, name: &str) -> KernelResult<Arc<T>> {
        self.entries.write().remove(name).ok_or(KernelError::NoSuchObject)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct IpcNamespace {
    queues: Registry<MessageQueue>,
    segments: Registry<SharedSegment>,
}

impl IpcNamespace {
    pub fn new() -> Self {
        Self { queues: Registry::new(), segments: Registry::new() }
    }

    pub fn register_queue(&self, name: &str, queue: Arc<MessageQueue>) -> KernelResult<()> {
        self.queues.register(name, queue)
    }

    pub fn lookup_queue(&self, name: &str) -> KernelResult<Arc<MessageQueue>> {
        self.queues.lookup(name)
    }

    pub fn unlink_queue(&self, name: &str) -> KernelResult<Arc<MessageQueue>> {
        self.queues.unlink(name)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.names()
    }

    pub fn register_segment(&self, name: &str, segment: Arc<SharedSegment>) -> KernelResult<()> {
        self.segments.register(name, segment)
    }

    pub fn lookup_segment(&self, name: &str) -> KernelResult<Arc<SharedSegment>> {
        self.segments.lookup(name)
    }

    pub fn unlink_segment(&self, name: &str) -> KernelResult<Arc<SharedSegment>> {
        self.segments.unlink(name)
    }

    pub fn segment_names(&self) -> Vec<String> {
        self.segments.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<MessageQueue> {
        Arc::new(MessageQueue::new(4, 32, None, 0))
    }

    #[test]
    fn test_register_lookup_unlink() {
        let ns = IpcNamespace::new();
        let q = queue();
        ns.register_queue("jobs", q.clone()).unwrap();
        assert!(Arc::ptr_eq(&ns.lookup_queue("jobs").unwrap(), &q));
        assert_eq!(ns.register_queue("jobs", queue()), Err(KernelError::AlreadyExists));
        ns.unlink_queue("jobs").unwrap();
        assert_eq!(ns.lookup_queue("jobs").err(), Some(KernelError::NoSuchObject));
        // Unlinking drops only the name
        assert_eq!(q.capacity(), 4);
    }

    #[test]
    fn test_bad_names() {
        let ns = IpcNamespace::new();
        assert_eq!(ns.register_queue("", queue()), Err(KernelError::InvalidArgument));
        assert_eq!(ns.register_queue("a\0b", queue()), Err(KernelError::InvalidArgument));
        let long = "x".repeat(NAME_MAX + 1);
        assert_eq!(ns.register_queue(&long, queue()), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_names_sorted() {
        let ns = IpcNamespace::new();
        ns.register_queue("b", queue()).unwrap();
        ns.register_queue("a", queue()).unwrap();
        assert_eq!(ns.queue_names(), vec!["a".to_string(), "b".to_string()]);
        assert!(ns.segment_names().is_empty());
    }
}
