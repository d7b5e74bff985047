//! Per-thread signal state
//!
//! Pending and blocked sets, the FIFO of rich payloads and the stack of
//! handler frames currently live on the user stack.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::info::SigInfo;
use super::types::*;
use crate::error::KernelResult;

#[derive(Debug, Clone)]
pub struct SignalState {
    pending: SigSet,
    blocked: SigSet,
    payloads: VecDeque<SigInfo>,
    max_payloads: usize,
    /// User addresses of frames pushed by handler invocations, innermost last
    frames: Vec<u64>,
}

impl SignalState {
    pub fn new(max_payloads: usize) -> Self {
        Self {
            pending: SigSet::empty(),
            blocked: SigSet::empty(),
            payloads: VecDeque::new(),
            max_payloads,
            frames: Vec::new(),
        }
    }

    /// State of a forked thread: same mask, nothing pending
    pub fn forked(&self) -> Self {
        Self { blocked: self.blocked, ..Self::new(self.max_payloads) }
    }

    pub fn pending(&self) -> SigSet {
        self.pending
    }

    pub fn blocked(&self) -> SigSet {
        self.blocked
    }

    /// Replace the mask; SIGKILL and SIGSTOP are silently kept unblocked
    pub fn set_blocked(&mut self, set: SigSet) {
        self.blocked = set.difference(SigSet::unblockable());
    }

    /// Mark `sig` pending, queueing `info` if given
    ///
    /// Standard signals coalesce: while one is pending, a new raise keeps the
    /// first payload and drops its own. Real-time signals queue one payload
    /// per raise up to the bound; past it the bit stays set and the payload
    /// is dropped.
    pub fn raise(&mut self, sig: u32, info: Option<SigInfo>) -> KernelResult<()> {
        check_signal(sig)?;
        let already = self.pending.contains(sig);
        if let Some(info) = info {
            let queue = if is_realtime(sig) {
                self.payloads.len() < self.max_payloads
            } else {
                !already && self.payloads.len() < self.max_payloads
            };
            if queue {
                self.payloads.push_back(info);
            }
        }
        self.pending.add(sig);
        Ok(())
    }

    /// Pending and not blocked
    pub fn deliverable(&self) -> SigSet {
        self.pending.difference(self.blocked)
    }

    pub fn has_deliverable(&self) -> bool {
        !self.deliverable().is_empty()
    }

    pub fn next_deliverable(&self) -> Option<u32> {
        self.deliverable().lowest()
    }

    /// Consume one instance of `sig`
    ///
    /// Returns the oldest payload queued for it. A standard signal is gone
    /// after one take; a real-time one stays pending while payloads remain.
    pub fn take(&mut self, sig: u32) -> Option<SigInfo> {
        let info = self
            .payloads
            .iter()
            .position(|info| info.signo == sig)
            .and_then(|index| self.payloads.remove(index));
        if !is_realtime(sig) || !self.payloads.iter().any(|info| info.signo == sig) {
            self.discard(sig);
        }
        info
    }

    /// Drop every instance of `sig`
    pub fn discard(&mut self, sig: u32) {
        self.pending.remove(sig);
        self.payloads.retain(|info| info.signo != sig);
    }

    pub fn queued_payloads(&self) -> usize {
        self.payloads.len()
    }

    pub fn push_frame(&mut self, addr: u64) {
        self.frames.push(addr);
    }

    pub fn pop_frame(&mut self) -> Option<u64> {
        self.frames.pop()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// exec: frames point into the discarded image
    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }
}
