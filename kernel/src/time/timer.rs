//! Wait deadlines
//!
//! Ordered set of (deadline, sequence, thread). The tick handler pops
//! everything due and times the corresponding waits out.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::Timestamp;
use crate::thread::Tid;

/// Identifies one armed deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerKey {
    pub deadline: Timestamp,
    seq: u64,
}

pub struct TimerQueue {
    entries: Mutex<BTreeSet<(TimerKey, Tid)>>,
    next_seq: AtomicU64,
}

impl TimerQueue {
    pub const fn new() -> Self {
        Self { entries: Mutex::new(BTreeSet::new()), next_seq: AtomicU64::new(0) }
    }

    pub fn arm(&self, deadline: Timestamp, tid: Tid) -> TimerKey {
        let key = TimerKey { deadline, seq: self.next_seq.fetch_add(1, Ordering::Relaxed) };
        self.entries.lock().insert((key, tid));
        key
    }

    /// Returns false if the timer already fired
    pub fn cancel(&self, key: TimerKey, tid: Tid) -> bool {
        self.entries.lock().remove(&(key, tid))
    }

    /// Remove and return every entry due at `now`, earliest first
    pub fn expire(&self, now: Timestamp) -> Vec<(TimerKey, Tid)> {
        let mut entries = self.entries.lock();
        let mut due = Vec::new();
        while let Some(first) = entries.first().copied() {
            if first.0.deadline > now {
                break;
            }
            entries.pop_first();
            due.push(first);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.entries.lock().first().map(|(key, _)| key.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(raw: u64) -> Tid {
        Tid::from_raw(raw).unwrap()
    }

    #[test]
    fn test_expire_in_deadline_order() {
        let timers = TimerQueue::new();
        timers.arm(Timestamp::from_ns(30), tid(1));
        timers.arm(Timestamp::from_ns(10), tid(2));
        timers.arm(Timestamp::from_ns(20), tid(3));

        let due: Vec<Tid> = timers.expire(Timestamp::from_ns(25)).into_iter().map(|e| e.1).collect();
        assert_eq!(due, vec![tid(2), tid(3)]);
        assert_eq!(timers.next_deadline(), Some(Timestamp::from_ns(30)));
    }

    #[test]
    fn test_cancel() {
        let timers = TimerQueue::new();
        let key = timers.arm(Timestamp::from_ns(5), tid(1));
        assert!(timers.cancel(key, tid(1)));
        assert!(!timers.cancel(key, tid(1)));
        assert!(timers.expire(Timestamp::from_ns(100)).is_empty());
    }
}
