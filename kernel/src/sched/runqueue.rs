//! Run-queue - ordered holder of Ready threads for one band on one CPU
//!
//! Intrusive doubly linked list: O(1) tail insert, head removal and
//! emptiness test. Callers hold the owning CPU scheduler lock.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use intrusive_collections::{intrusive_adapter, LinkedList, LinkedListLink};

use crate::thread::{Thread, Tid};

pub struct RunEntry {
    link: LinkedListLink,
    thread: Arc<Thread>,
    rank: u32,
}

intrusive_adapter!(pub RunAdapter = Box<RunEntry>: RunEntry { link: LinkedListLink });

pub struct RunQueue {
    list: LinkedList<RunAdapter>,
    len: usize,
}

impl RunQueue {
    pub fn new() -> Self {
        Self { list: LinkedList::new(RunAdapter::new()), len: 0 }
    }

    fn entry(thread: Arc<Thread>, rank: u32) -> Box<RunEntry> {
        Box::new(RunEntry { link: LinkedListLink::new(), thread, rank })
    }

    /// Append at the tail (round-robin within the band)
    pub fn enqueue(&mut self, thread: Arc<Thread>, rank: u32) {
        self.list.push_back(Self::entry(thread, rank));
        self.len += 1;
    }

    /// Insert behind every entry of equal or higher rank
    pub fn enqueue_ordered(&mut self, thread: Arc<Thread>, rank: u32) {
        let mut cursor = self.list.front_mut();
        while let Some(entry) = cursor.get() {
            if entry.rank < rank {
                break;
            }
            cursor.move_next();
        }
        // A null cursor inserts at the back
        cursor.insert_before(Self::entry(thread, rank));
        self.len += 1;
    }

    pub fn dequeue_head(&mut self) -> Option<Arc<Thread>> {
        let entry = self.list.pop_front()?;
        self.len -= 1;
        Some(entry.thread)
    }

    pub fn head_rank(&self) -> Option<u32> {
        self.list.front().get().map(|entry| entry.rank)
    }

    /// Unlink `tid` wherever it sits
    pub fn remove(&mut self, tid: Tid) -> Option<Arc<Thread>> {
        let mut cursor = self.list.front_mut();
        while let Some(entry) = cursor.get() {
            if entry.thread.id() == tid {
                let entry = cursor.remove()?;
                self.len -= 1;
                return Some(entry.thread);
            }
            cursor.move_next();
        }
        None
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.list.iter().any(|entry| entry.thread.id() == tid)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Queued threads, head first
    pub fn tids(&self) -> Vec<Tid> {
        self.list.iter().map(|entry| entry.thread.id()).collect()
    }
}
