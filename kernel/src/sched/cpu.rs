//! Per-CPU scheduler object
//!
//! Owns the current slot, the idle thread and the run-queues of one CPU.
//! Everything in `CpuState` is guarded by the CPU scheduler lock; the
//! mailbox and flags are lock-free so remote CPUs can use them.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use super::mailbox::Mailbox;
use super::policy::SchedClass;
use super::runqueue::RunQueue;
use super::stats::CpuStats;
use crate::arch::{CpuId, PageTableRoot};
use crate::thread::{Thread, ThreadState, Tid};
use crate::time::Timestamp;

pub struct CpuState {
    pub current: Option<Arc<Thread>>,
    pub idle: Option<Arc<Thread>>,
    pub realtime: RunQueue,
    /// Index = effective band, highest band scanned first
    pub normal: Vec<RunQueue>,
    pub batch: RunQueue,
    pub idle_class: RunQueue,
    pub last_tick: Timestamp,
    pub active_root: PageTableRoot,
    /// Terminated threads switched away from, kernel stacks not yet freed
    pub dead: Vec<Arc<Thread>>,
}

impl CpuState {
    fn new(bands: usize) -> Self {
        Self {
            current: None,
            idle: None,
            realtime: RunQueue::new(),
            normal: (0..bands).map(|_| RunQueue::new()).collect(),
            batch: RunQueue::new(),
            idle_class: RunQueue::new(),
            last_tick: Timestamp::ZERO,
            active_root: PageTableRoot::KERNEL,
            dead: Vec::new(),
        }
    }

    /// Put a Ready thread in its band's queue
    pub fn enqueue(&mut self, thread: Arc<Thread>) {
        let (class, rank, band) = {
            let sched = thread.sched.lock();
            (sched.params.class, sched.rank, sched.params.effective_band(self.normal.len()))
        };
        match class {
            SchedClass::Realtime => self.realtime.enqueue_ordered(thread, rank),
            SchedClass::Normal => self.normal[band].enqueue(thread, rank),
            SchedClass::Batch => self.batch.enqueue(thread, rank),
            SchedClass::Idle => self.idle_class.enqueue(thread, rank),
        }
    }

    fn queues_mut(&mut self) -> impl Iterator<Item = &mut RunQueue> + '_ {
        core::iter::once(&mut self.realtime)
            .chain(self.normal.iter_mut().rev())
            .chain(core::iter::once(&mut self.batch))
            .chain(core::iter::once(&mut self.idle_class))
    }

    /// Queues in selection order
    pub fn queues(&self) -> impl Iterator<Item = &RunQueue> + '_ {
        core::iter::once(&self.realtime)
            .chain(self.normal.iter().rev())
            .chain(core::iter::once(&self.batch))
            .chain(core::iter::once(&self.idle_class))
    }

    /// Dequeue the next thread to run; the idle thread if nothing is Ready
    ///
    /// Entries that stopped being Ready while queued are dropped.
    pub fn select_next(&mut self) -> Option<Arc<Thread>> {
        for queue in self.queues_mut() {
            while let Some(thread) = queue.dequeue_head() {
                if thread.state() == ThreadState::Ready {
                    return Some(thread);
                }
            }
        }
        self.idle.clone()
    }

    /// Rank of the best queued thread
    pub fn best_ready_rank(&self) -> Option<u32> {
        self.queues().find_map(RunQueue::head_rank)
    }

    pub fn remove(&mut self, tid: Tid) -> Option<Arc<Thread>> {
        self.queues_mut().find_map(|queue| queue.remove(tid))
    }

    pub fn ready_count(&self) -> usize {
        self.queues().map(RunQueue::len).sum()
    }

    /// Queued threads in selection order
    pub fn ready_tids(&self) -> Vec<Tid> {
        self.queues().flat_map(RunQueue::tids).collect()
    }

    pub fn current_tid(&self) -> Option<Tid> {
        self.current.as_ref().map(|thread| thread.id())
    }

    pub fn is_idle(&self) -> bool {
        self.current.as_ref().map_or(true, |thread| thread.is_idle())
    }
}

pub struct CpuScheduler {
    id: CpuId,
    pub(crate) state: Mutex<CpuState>,
    pub(crate) mailbox: Mailbox,
    need_resched: AtomicBool,
    pub(crate) stats: CpuStats,
}

impl CpuScheduler {
    pub fn new(id: CpuId, bands: usize) -> Self {
        Self {
            id,
            state: Mutex::new(CpuState::new(bands)),
            mailbox: Mailbox::new(),
            need_resched: AtomicBool::new(false),
            stats: CpuStats::new(),
        }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    pub fn request_resched(&self) {
        self.need_resched.store(true, Ordering::Release);
    }

    pub fn take_resched(&self) -> bool {
        self.need_resched.swap(false, Ordering::AcqRel)
    }

    pub fn needs_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }
}
