//! Pipes
//!
//! Bounded byte stream between reader and writer ends. Ends are counted:
//! cloning an end (fork) adds one, dropping it removes one. Reads see EOF
//! once no writer is left; writes fail with `BrokenPipe` once no reader is
//! left.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::{Mutex, MutexGuard};

use crate::sync::WaitQueue;

#[derive(Debug)]
pub struct PipeState {
    buf: VecDeque<u8>,
    capacity: usize,
    readers: usize,
    writers: usize,
}

impl PipeState {
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn space(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn readers(&self) -> usize {
        self.readers
    }

    pub fn writers(&self) -> usize {
        self.writers
    }

    /// Move up to `out.len()` buffered bytes out
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.buf.len());
        for (slot, byte) in out.iter_mut().zip(self.buf.drain(..count)) {
            *slot = byte;
        }
        count
    }

    /// Buffer as much of `data` as fits
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.space());
        self.buf.extend(&data[..count]);
        count
    }
}

pub struct Pipe {
    id: u64,
    state: Mutex<PipeState>,
    /// Readers waiting for data or EOF
    pub(crate) readable: WaitQueue,
    /// Writers waiting for room
    pub(crate) writable: WaitQueue,
}

impl Pipe {
    /// A pipe of `capacity` bytes with one reader and one writer
    pub fn new(capacity: usize) -> (PipeReader, PipeWriter) {
        let pipe = Arc::new(Pipe {
            id: super::next_object_id(),
            state: Mutex::new(PipeState {
                buf: VecDeque::with_capacity(capacity),
                capacity,
                readers: 1,
                writers: 1,
            }),
            readable: WaitQueue::new(),
            writable: WaitQueue::new(),
        });
        (PipeReader(pipe.clone()), PipeWriter(pipe))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock()
    }

    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    pub fn writers(&self) -> usize {
        self.state.lock().writers
    }

    pub fn buffered(&self) -> usize {
        self.state.lock().buf.len()
    }
}

/// Read end
pub struct PipeReader(Arc<Pipe>);

impl PipeReader {
    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.0
    }
}

impl Clone for PipeReader {
    fn clone(&self) -> Self {
        self.0.state.lock().readers += 1;
        Self(self.0.clone())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.0.state.lock().readers -= 1;
    }
}

/// Write end
pub struct PipeWriter(Arc<Pipe>);

impl PipeWriter {
    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.0
    }
}

impl Clone for PipeWriter {
    fn clone(&self) -> Self {
        self.0.state.lock().writers += 1;
        Self(self.0.clone())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.0.state.lock().writers -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_write_and_read() {
        let (reader, _writer) = Pipe::new(4);
        let mut state = reader.pipe().state();
        assert_eq!(state.write(b"abcdef"), 4);
        assert_eq!(state.space(), 0);
        let mut out = [0u8; 3];
        assert_eq!(state.read(&mut out), 3);
        assert_eq!(&out, b"abc");
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_end_counting() {
        let (reader, writer) = Pipe::new(16);
        let pipe = reader.pipe().clone();
        let second = writer.clone();
        assert_eq!(pipe.writers(), 2);
        drop(writer);
        drop(second);
        assert_eq!(pipe.writers(), 0);
        assert_eq!(pipe.readers(), 1);
        drop(reader);
        assert_eq!(pipe.readers(), 0);
    }

    #[test]
    fn test_zero_length_is_noop() {
        let (reader, _writer) = Pipe::new(8);
        let mut state = reader.pipe().state();
        assert_eq!(state.write(&[]), 0);
        assert_eq!(state.read(&mut []), 0);
        assert!(state.is_empty());
    }
}
