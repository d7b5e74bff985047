//! Sleeping and waking threads
//!
//! Protocol, for any object guarded by its own lock:
//!   1. lock the object, find the condition false
//!   2. `prepare_wait` (registers on the wait queue, arms the deadline)
//!   3. unlock the object, `block_thread`
//! A waker changes the object under its lock, unlocks, then wakes. A wakeup
//! racing between 2 and 3 leaves the wait inactive and `block_thread` does
//! nothing, so no wakeup is lost.

use alloc::sync::Arc;
use log::trace;

use super::{Progress, WaitQueue, Waiter};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::thread::{Thread, ThreadState, Tid};
use crate::time::{Duration, Timeout, TimerKey, Timestamp};

/// Channel id used by timer-only sleeps
pub const SLEEP_CHANNEL: u64 = 0;

/// Why a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    Wakeup,
    Timeout,
    Interrupted,
}

impl WakeResult {
    pub fn into_result(self) -> KernelResult<()> {
        match self {
            WakeResult::Wakeup => Ok(()),
            WakeResult::Timeout => Err(KernelError::Timeout),
            WakeResult::Interrupted => Err(KernelError::Interrupted),
        }
    }
}

/// What a thread is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Sleep,
    ChildExit,
    MessageSend,
    MessageReceive,
    Semaphore,
    PipeRead,
    PipeWrite,
    Event,
}

/// Per-thread wait linkage
#[derive(Debug)]
pub struct WaitLink {
    active: bool,
    token: u64,
    channel: u64,
    queue: Option<WaitQueue>,
    reason: Option<WaitReason>,
    deadline: Option<Timestamp>,
    timer: Option<TimerKey>,
    since: Timestamp,
    /// Result of the last finished wait, until the re-issued call reads it
    outcome: Option<(u64, WakeResult)>,
}

impl WaitLink {
    pub const fn new() -> Self {
        Self {
            active: false,
            token: 0,
            channel: SLEEP_CHANNEL,
            queue: None,
            reason: None,
            deadline: None,
            timer: None,
            since: Timestamp::ZERO,
            outcome: None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.active
    }

    pub fn reason(&self) -> Option<WaitReason> {
        if self.active {
            self.reason
        } else {
            None
        }
    }

    /// Queue the thread is registered on
    pub fn queue(&self) -> Option<&WaitQueue> {
        self.queue.as_ref().filter(|_| self.active)
    }

    pub fn since(&self) -> Timestamp {
        self.since
    }

    fn clear(&mut self) {
        self.active = false;
        self.queue = None;
        self.reason = None;
    }
}

impl Kernel {
    /// Deadline for a (re-)issued wait on `channel`
    ///
    /// Consumes the outcome of a previous wait on the same channel: a
    /// timeout or interruption is reported, a plain wakeup keeps the
    /// original deadline. Outcomes filed under another channel are stale
    /// and dropped.
    pub(crate) fn resume_wait(
        &self,
        thread: &Thread,
        channel: u64,
        timeout: Timeout,
    ) -> KernelResult<Option<Timestamp>> {
        let mut link = thread.wait.lock();
        match link.outcome.take() {
            Some((ch, result)) if ch == channel => match result {
                WakeResult::Wakeup => Ok(link.deadline),
                WakeResult::Timeout => Err(KernelError::Timeout),
                WakeResult::Interrupted => Err(KernelError::Interrupted),
            },
            _ => {
                let deadline = timeout.deadline(self.now());
                link.deadline = deadline;
                Ok(deadline)
            }
        }
    }

    /// Register `thread` as waiting on `queue` (or on the timer alone)
    ///
    /// Fails with `Timeout` if the deadline already passed and with
    /// `Interrupted` if a deliverable signal is pending; nothing stays
    /// registered in either case.
    pub(crate) fn prepare_wait(
        &self,
        thread: &Arc<Thread>,
        queue: Option<&WaitQueue>,
        reason: WaitReason,
        deadline: Option<Timestamp>,
    ) -> KernelResult<()> {
        let now = self.now();
        if deadline.map_or(false, |d| d <= now) {
            return Err(KernelError::Timeout);
        }
        let rank = thread.rank();
        let token = {
            let mut link = thread.wait.lock();
            sched_assert!(!link.active, "{} registered on two waits", thread.id());
            link.token = link.token.wrapping_add(1);
            link.active = true;
            link.channel = queue.map_or(SLEEP_CHANNEL, WaitQueue::id);
            link.queue = queue.cloned();
            link.reason = Some(reason);
            link.deadline = deadline;
            link.since = now;
            link.outcome = None;
            link.timer = deadline.map(|d| self.timers.arm(d, thread.id()));
            link.token
        };
        if let Some(queue) = queue {
            queue.push(Waiter::new(thread.clone(), token, rank, now));
        }
        // A signal raised before `active` was visible did not interrupt us
        if thread.signals.lock().has_deliverable() {
            self.cancel_wait(thread);
            return Err(KernelError::Interrupted);
        }
        trace!("{} waits ({:?}, deadline {:?})", thread.id(), reason, deadline);
        Ok(())
    }

    /// Take a thread that called `prepare_wait` off the CPU
    pub(crate) fn block_thread(&self, thread: &Arc<Thread>) {
        let prev = {
            let link = thread.wait.lock();
            if !link.active {
                return;
            }
            let target = if link.queue.is_some() { ThreadState::Waiting } else { ThreadState::Blocked };
            match thread.state.transition(&[ThreadState::Running, ThreadState::Ready], target) {
                Ok(prev) => prev,
                Err(_) => return,
            }
        };
        self.deschedule(thread, prev);
    }

    /// Finish the wait identified by `token`; false if it already ended
    fn wake_thread(&self, thread: &Arc<Thread>, token: u64, result: WakeResult) -> bool {
        let runnable = {
            let mut link = thread.wait.lock();
            if !link.active || link.token != token {
                return false;
            }
            link.clear();
            if let Some(key) = link.timer.take() {
                self.timers.cancel(key, thread.id());
            }
            link.outcome = Some((link.channel, result));
            let target = if thread.is_stopped() { ThreadState::Suspended } else { ThreadState::Ready };
            let from = [ThreadState::Waiting, ThreadState::Blocked];
            thread.state.transition(&from, target).is_ok() && target == ThreadState::Ready
        };
        trace!("{} wakes ({:?})", thread.id(), result);
        if runnable {
            self.enqueue_thread(thread);
        }
        true
    }

    /// End the current wait of `thread` from outside its queue's owner
    fn abort_wait(&self, thread: &Arc<Thread>, result: WakeResult) -> bool {
        let (token, queue) = {
            let link = thread.wait.lock();
            if !link.active {
                return false;
            }
            (link.token, link.queue.clone())
        };
        if let Some(queue) = queue {
            // Lost the race against a waker that already dequeued us
            if !queue.remove(thread.id(), token) {
                return false;
            }
        }
        self.wake_thread(thread, token, result)
    }

    /// Wake the best waiter of `queue`
    pub fn wake_one(&self, queue: &WaitQueue) -> Option<Tid> {
        while let Some(waiter) = queue.pop_best() {
            if self.wake_thread(&waiter.thread, waiter.token, WakeResult::Wakeup) {
                return Some(waiter.thread.id());
            }
        }
        None
    }

    /// Wake every waiter of `queue`; returns how many were woken
    pub fn wake_all(&self, queue: &WaitQueue) -> usize {
        queue
            .take_all()
            .into_iter()
            .filter(|waiter| self.wake_thread(&waiter.thread, waiter.token, WakeResult::Wakeup))
            .count()
    }

    /// Break a wait because a signal became deliverable
    pub(crate) fn interrupt_wait(&self, thread: &Arc<Thread>) -> bool {
        self.abort_wait(thread, WakeResult::Interrupted)
    }

    /// Drop any registered wait without recording an outcome
    pub(crate) fn cancel_wait(&self, thread: &Arc<Thread>) {
        let (token, queue) = {
            let link = thread.wait.lock();
            if !link.active {
                return;
            }
            (link.token, link.queue.clone())
        };
        if let Some(queue) = queue {
            queue.remove(thread.id(), token);
        }
        let mut link = thread.wait.lock();
        if link.active && link.token == token {
            link.clear();
            if let Some(key) = link.timer.take() {
                self.timers.cancel(key, thread.id());
            }
        }
    }

    /// Time out every wait whose deadline is due
    pub(crate) fn expire_timers(&self, now: Timestamp) {
        for (key, tid) in self.timers.expire(now) {
            let Ok(thread) = self.thread(tid) else { continue };
            let (token, queue) = {
                let link = thread.wait.lock();
                if !link.active || link.timer != Some(key) {
                    continue;
                }
                (link.token, link.queue.clone())
            };
            if let Some(queue) = queue {
                if !queue.remove(tid, token) {
                    continue;
                }
            }
            self.wake_thread(&thread, token, WakeResult::Timeout);
        }
    }

    /// Move a Waiting/Blocked thread back to Ready
    ///
    /// The interrupted operation observes a plain wakeup.
    pub fn thread_wakeup(&self, tid: Tid) -> KernelResult<bool> {
        let thread = self.thread(tid)?;
        Ok(self.abort_wait(&thread, WakeResult::Wakeup))
    }

    /// Sleep on `queue` until woken, timed out or interrupted
    ///
    /// The caller checks its condition before calling. Re-issue after
    /// `Blocked` to read the outcome.
    pub fn sleep_on(
        &self,
        tid: Tid,
        queue: &WaitQueue,
        reason: WaitReason,
        timeout: Timeout,
    ) -> KernelResult<Progress<WakeResult>> {
        let thread = self.thread(tid)?;
        {
            let mut link = thread.wait.lock();
            if let Some((channel, result)) = link.outcome {
                link.outcome = None;
                if channel == queue.id() {
                    return Ok(Progress::Done(result));
                }
            }
        }
        if timeout.is_poll() {
            return Err(KernelError::WouldBlock);
        }
        match self.prepare_wait(&thread, Some(queue), reason, timeout.deadline(self.now())) {
            Ok(()) => {}
            Err(KernelError::Timeout) => return Ok(Progress::Done(WakeResult::Timeout)),
            Err(KernelError::Interrupted) => return Ok(Progress::Done(WakeResult::Interrupted)),
            Err(err) => return Err(err),
        }
        self.block_thread(&thread);
        Ok(Progress::Blocked)
    }

    /// Sleep for `duration`; `Interrupted` if a signal arrives first
    pub fn sleep(&self, tid: Tid, duration: Duration) -> KernelResult<Progress<()>> {
        let thread = self.thread(tid)?;
        let deadline = match self.resume_wait(&thread, SLEEP_CHANNEL, Timeout::After(duration)) {
            Ok(deadline) => deadline,
            Err(KernelError::Timeout) => return Ok(Progress::Done(())),
            Err(err) => return Err(err),
        };
        if duration.is_zero() {
            return Ok(Progress::Done(()));
        }
        match self.prepare_wait(&thread, None, WaitReason::Sleep, deadline) {
            Ok(()) => {}
            Err(KernelError::Timeout) => return Ok(Progress::Done(())),
            Err(err) => return Err(err),
        }
        self.block_thread(&thread);
        Ok(Progress::Blocked)
    }
}
