//! Pool de frames physiques
//!
//! Chaque frame porte ses 4 KiB de contenu. Le pool ne fait que compter :
//! une frame est rendue quand sa dernière référence (`FrameRef`) disparaît,
//! ce qui donne le partage copy-on-write gratuitement via `Arc::strong_count`.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

use super::{MemoryError, MemoryResult, PAGE_SIZE};

struct PoolInner {
    capacity: usize,
    allocated: AtomicUsize,
    peak: AtomicUsize,
    next_number: AtomicU64,
}

/// Compteur de frames partagé par tous les espaces d'adressage
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

/// Une page physique
pub struct Frame {
    number: u64,
    data: Mutex<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

pub type FrameRef = Arc<Frame>;

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                allocated: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                next_number: AtomicU64::new(1),
            }),
        }
    }

    fn reserve(&self) -> MemoryResult<()> {
        let inner = &self.inner;
        let mut current = inner.allocated.load(Ordering::Relaxed);
        loop {
            if current >= inner.capacity {
                return Err(MemoryError::OutOfMemory);
            }
            match inner.allocated.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        inner.peak.fetch_max(current + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Alloue une frame remplie de zéros
    pub fn alloc_zeroed(&self) -> MemoryResult<FrameRef> {
        self.reserve()?;
        Ok(Arc::new(Frame {
            number: self.inner.next_number.fetch_add(1, Ordering::Relaxed),
            data: Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            pool: self.inner.clone(),
        }))
    }

    /// Alloue une frame contenant une copie de `source`
    pub fn alloc_copy(&self, source: &Frame) -> MemoryResult<FrameRef> {
        let frame = self.alloc_zeroed()?;
        frame.data.lock().copy_from_slice(&source.data.lock());
        Ok(frame)
    }

    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.inner.capacity.saturating_sub(self.allocated())
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }
}

impl Frame {
    /// Numéro de frame (identité physique)
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        let data = self.data.lock();
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.lock();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copie le contenu complet de la page
    pub fn contents(&self) -> Box<[u8]> {
        self.data.lock().clone()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.pool.allocated.fetch_sub(1, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Frame(#{})", self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_counts_and_limits() {
        let pool = FramePool::new(2);
        let a = pool.alloc_zeroed().unwrap();
        let b = pool.alloc_zeroed().unwrap();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.alloc_zeroed().unwrap_err(), MemoryError::OutOfMemory);
        drop(a);
        assert_eq!(pool.allocated(), 1);
        assert!(pool.alloc_zeroed().is_ok());
        assert_eq!(pool.peak(), 2);
        drop(b);
    }

    #[test]
    fn test_copy_is_independent() {
        let pool = FramePool::new(4);
        let a = pool.alloc_zeroed().unwrap();
        a.write(10, b"hello");
        let b = pool.alloc_copy(&a).unwrap();
        b.write(10, b"HELLO");
        let mut buf = [0u8; 5];
        a.read(10, &mut buf);
        assert_eq!(&buf, b"hello");
        b.read(10, &mut buf);
        assert_eq!(&buf, b"HELLO");
        assert_ne!(a.number(), b.number());
    }
}
