//! Priority message queue
//!
//! Bounded queue of byte messages. Dequeue order: highest priority first,
//! FIFO among equal priorities (a per-queue sequence number breaks ties).

use alloc::collections::BinaryHeap;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::{Ordering, Reverse};
use spin::{Mutex, MutexGuard};

use crate::error::{KernelError, KernelResult};
use crate::process::Pid;
use crate::sync::WaitQueue;
use crate::time::Timestamp;

/// Message priorities are `0..MQ_PRIO_MAX`
pub const MQ_PRIO_MAX: u32 = 32768;

/// One queued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub priority: u32,
    pub sender: Pid,
    pub timestamp: Timestamp,
    pub payload: Vec<u8>,
}

/// What a receive copied out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub len: usize,
    pub priority: u32,
    pub sender: Pid,
    pub timestamp: Timestamp,
}

struct Queued {
    seq: u64,
    message: Message,
}

impl Queued {
    fn key(&self) -> (u32, Reverse<u64>) {
        (self.message.priority, Reverse(self.seq))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Contents of a queue, reached through [`MessageQueue::state`]
pub struct QueueState {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
    capacity: usize,
}

impl QueueState {
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Enqueue; `WouldBlock` when full
    pub fn push(&mut self, message: Message) -> KernelResult<()> {
        if self.is_full() {
            return Err(KernelError::WouldBlock);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued { seq, message });
        Ok(())
    }

    /// Copy the head message into `buf` and dequeue it
    ///
    /// `WouldBlock` when empty. A head larger than `buf` stays queued and
    /// fails with `MessageTooBig`.
    pub fn pop_into(&mut self, buf: &mut [u8]) -> KernelResult<ReceivedMessage> {
        let head_len = self.heap.peek().ok_or(KernelError::WouldBlock)?.message.payload.len();
        if head_len > buf.len() {
            return Err(KernelError::MessageTooBig);
        }
        let Some(Queued { message, .. }) = self.heap.pop() else {
            return Err(KernelError::WouldBlock);
        };
        buf[..head_len].copy_from_slice(&message.payload);
        Ok(ReceivedMessage {
            len: head_len,
            priority: message.priority,
            sender: message.sender,
            timestamp: message.timestamp,
        })
    }

    pub fn peek_priority(&self) -> Option<u32> {
        self.heap.peek().map(|queued| queued.message.priority)
    }
}

pub struct MessageQueue {
    id: u64,
    name: Option<String>,
    owner: u32,
    capacity: usize,
    max_message: usize,
    state: Mutex<QueueState>,
    /// Threads waiting for room
    pub(crate) senders: WaitQueue,
    /// Threads waiting for a message
    pub(crate) receivers: WaitQueue,
}

impl MessageQueue {
    pub fn new(capacity: usize, max_message: usize, name: Option<String>, owner: u32) -> Self {
        Self {
            id: super::next_object_id(),
            name,
            owner,
            capacity,
            max_message,
            state: Mutex::new(QueueState { heap: BinaryHeap::with_capacity(capacity), next_seq: 0, capacity }),
            senders: WaitQueue::new(),
            receivers: WaitQueue::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Effective uid of the creator
    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_message(&self) -> usize {
        self.max_message
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    /// Lock the contents; waits are registered while this is held
    pub fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    pub fn waiting_senders(&self) -> usize {
        self.senders.len()
    }

    pub fn waiting_receivers(&self) -> usize {
        self.receivers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(priority: u32, payload: &[u8]) -> Message {
        Message {
            priority,
            sender: Pid::from_raw(1).unwrap(),
            timestamp: Timestamp::ZERO,
            payload: payload.to_vec(),
        }
    }

    fn receive(state: &mut QueueState) -> Vec<u8> {
        let mut buf = [0u8; 16];
        let got = state.pop_into(&mut buf).unwrap();
        buf[..got.len].to_vec()
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = MessageQueue::new(8, 16, None, 0);
        let mut state = queue.state();
        state.push(message(1, b"a")).unwrap();
        state.push(message(3, b"b")).unwrap();
        state.push(message(1, b"c")).unwrap();
        state.push(message(2, b"d")).unwrap();

        let order: Vec<Vec<u8>> = (0..4).map(|_| receive(&mut state)).collect();
        assert_eq!(order, vec![b"b".to_vec(), b"d".to_vec(), b"a".to_vec(), b"c".to_vec()]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_full_and_empty() {
        let queue = MessageQueue::new(1, 16, None, 0);
        let mut state = queue.state();
        let mut buf = [0u8; 4];
        assert_eq!(state.pop_into(&mut buf), Err(KernelError::WouldBlock));
        state.push(message(0, b"x")).unwrap();
        assert!(state.is_full());
        assert_eq!(state.push(message(0, b"y")), Err(KernelError::WouldBlock));
    }

    #[test]
    fn test_short_buffer_keeps_message() {
        let queue = MessageQueue::new(2, 16, None, 0);
        let mut state = queue.state();
        state.push(message(5, b"hello")).unwrap();
        let mut small = [0u8; 2];
        assert_eq!(state.pop_into(&mut small), Err(KernelError::MessageTooBig));
        assert_eq!(state.len(), 1);
        assert_eq!(state.peek_priority(), Some(5));
        assert_eq!(receive(&mut state), b"hello".to_vec());
    }

    #[test]
    fn test_zero_length_message() {
        let queue = MessageQueue::new(2, 16, None, 0);
        let mut state = queue.state();
        state.push(message(0, b"")).unwrap();
        let mut buf = [];
        assert_eq!(state.pop_into(&mut buf).unwrap().len, 0);
    }
}
