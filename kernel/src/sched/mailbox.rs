//! Cross-CPU request mailbox
//!
//! Lock-free LIFO list other CPUs push onto; the owning CPU takes the whole
//! list at once with its scheduler lock held and replays it oldest first.
//! Remote CPUs never touch another CPU's run-queues.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::thread::{Thread, Tid};

/// Work posted to a CPU by another CPU
pub enum CpuRequest {
    /// Put a Ready thread on this CPU's run-queue
    Enqueue(Arc<Thread>),
    /// Unlink a thread from this CPU's run-queues
    Remove(Tid),
}

struct Node {
    request: CpuRequest,
    next: *mut Node,
}

pub struct Mailbox {
    head: AtomicPtr<Node>,
}

// SAFETY: nodes are owned by the list until `drain` takes them back; the
// requests they carry are Send.
unsafe impl Send for Mailbox {}
unsafe impl Sync for Mailbox {}

impl Mailbox {
    pub const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Push a request (never blocks, callable from any CPU)
    pub fn post(&self, request: CpuRequest) {
        let node = Box::into_raw(Box::new(Node { request, next: ptr::null_mut() }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: `node` is not yet published, we own it exclusively
            unsafe { (*node).next = head };
            if self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Take every posted request, oldest first
    pub fn drain(&self) -> Vec<CpuRequest> {
        let mut current = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut requests = Vec::new();
        while !current.is_null() {
            // SAFETY: the swap above made this list exclusively ours; every
            // node was created by `Box::into_raw` in `post`
            let node = unsafe { Box::from_raw(current) };
            current = node.next;
            requests.push(node.request);
        }
        requests.reverse();
        requests
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.drain();
    }
}
