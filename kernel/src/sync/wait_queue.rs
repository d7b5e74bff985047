//! Wait queues
//!
//! Set of threads sleeping on one condition. `wake_one` order: highest
//! scheduling rank first, then the longest waiter.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::thread::{Thread, Tid};
use crate::time::Timestamp;

/// Channel 0 is reserved for timer-only sleeps
static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_WAITER_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) struct Waiter {
    pub thread: Arc<Thread>,
    pub token: u64,
    pub rank: u32,
    pub since: Timestamp,
    seq: u64,
}

impl Waiter {
    pub fn new(thread: Arc<Thread>, token: u64, rank: u32, since: Timestamp) -> Self {
        Self { thread, token, rank, since, seq: NEXT_WAITER_SEQ.fetch_add(1, Ordering::Relaxed) }
    }

    /// Wake precedence: larger is woken first
    fn precedes(&self, other: &Waiter) -> bool {
        (self.rank, other.since, other.seq) > (other.rank, self.since, self.seq)
    }
}

struct Inner {
    id: u64,
    waiters: Mutex<Vec<Waiter>>,
}

/// Shared handle to a wait queue
#[derive(Clone)]
pub struct WaitQueue {
    inner: Arc<Inner>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Channel id a waiter's outcome is filed under
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.waiters.lock().is_empty()
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.inner.waiters.lock().iter().any(|w| w.thread.id() == tid)
    }

    /// Waiting threads in wake order
    pub fn waiters(&self) -> Vec<Tid> {
        let waiters = self.inner.waiters.lock();
        let mut order: Vec<&Waiter> = waiters.iter().collect();
        order.sort_by_key(|w| (core::cmp::Reverse(w.rank), w.since, w.seq));
        order.iter().map(|w| w.thread.id()).collect()
    }

    pub(crate) fn push(&self, waiter: Waiter) {
        self.inner.waiters.lock().push(waiter);
    }

    pub(crate) fn pop_best(&self) -> Option<Waiter> {
        let mut waiters = self.inner.waiters.lock();
        let mut best: Option<usize> = None;
        for (index, waiter) in waiters.iter().enumerate() {
            match best {
                Some(b) if !waiter.precedes(&waiters[b]) => {}
                _ => best = Some(index),
            }
        }
        best.map(|index| waiters.swap_remove(index))
    }

    /// Remove every waiter, best first
    pub(crate) fn take_all(&self) -> Vec<Waiter> {
        let mut taken = Vec::new();
        while let Some(waiter) = self.pop_best() {
            taken.push(waiter);
        }
        taken
    }

    /// Remove the waiter registered by `tid` with `token`
    pub(crate) fn remove(&self, tid: Tid, token: u64) -> bool {
        let mut waiters = self.inner.waiters.lock();
        match waiters.iter().position(|w| w.thread.id() == tid && w.token == token) {
            Some(index) => {
                waiters.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

impl core::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "WaitQueue#{}", self.inner.id)
    }
}
