//! Magasins de sauvegarde
//!
//! Sources de contenu pour les pages absentes : fichiers mappés et
//! périphérique de swap. Les implémentations en mémoire servent au boot
//! (initrd) et à l'exécution hébergée.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

use super::{MemoryError, MemoryResult, PAGE_SIZE};

/// Contenu d'un objet mappable (fichier)
pub trait BackingStore: Send + Sync {
    /// Remplit `buf` (une page) depuis `offset`; au-delà de la fin, des zéros
    fn read_page(&self, offset: u64, buf: &mut [u8]) -> MemoryResult<()>;

    /// Taille de l'objet en octets
    fn size(&self) -> u64;
}

/// Fichier résidant en mémoire
pub struct MemoryFile {
    name: String,
    data: Vec<u8>,
    failing: AtomicBool,
}

impl MemoryFile {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self { name: String::from(name), data, failing: AtomicBool::new(false) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simule un support défaillant
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl BackingStore for MemoryFile {
    fn read_page(&self, offset: u64, buf: &mut [u8]) -> MemoryResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MemoryError::Io);
        }
        buf.fill(0);
        let start = offset as usize;
        if start < self.data.len() {
            let end = (start + buf.len()).min(self.data.len());
            buf[..end - start].copy_from_slice(&self.data[start..end]);
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Emplacement d'une page dans le swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(pub u64);

/// Périphérique de swap
pub trait SwapDevice: Send + Sync {
    fn write_page(&self, data: &[u8]) -> MemoryResult<SwapSlot>;
    fn read_page(&self, slot: SwapSlot, buf: &mut [u8]) -> MemoryResult<()>;
    fn free(&self, slot: SwapSlot);
    /// Emplacements occupés
    fn used(&self) -> usize;
}

/// Swap en mémoire, borné en nombre d'emplacements
pub struct MemorySwap {
    slots: Mutex<BTreeMap<u64, Box<[u8]>>>,
    next_slot: AtomicU64,
    capacity: usize,
    failing: AtomicBool,
}

impl MemorySwap {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            next_slot: AtomicU64::new(0),
            capacity,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SwapDevice for MemorySwap {
    fn write_page(&self, data: &[u8]) -> MemoryResult<SwapSlot> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MemoryError::Io);
        }
        let mut slots = self.slots.lock();
        if slots.len() >= self.capacity {
            return Err(MemoryError::OutOfMemory);
        }
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        slots.insert(slot, Box::from(&data[..PAGE_SIZE]));
        Ok(SwapSlot(slot))
    }

    fn read_page(&self, slot: SwapSlot, buf: &mut [u8]) -> MemoryResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MemoryError::Io);
        }
        let slots = self.slots.lock();
        let page = slots.get(&slot.0).ok_or(MemoryError::Io)?;
        buf.copy_from_slice(&page[..buf.len()]);
        Ok(())
    }

    fn free(&self, slot: SwapSlot) {
        self.slots.lock().remove(&slot.0);
    }

    fn used(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_file_reads_zero_past_end() {
        let file = MemoryFile::new("data", vec![7u8; 10]);
        let mut page = vec![0xAAu8; PAGE_SIZE];
        file.read_page(0, &mut page).unwrap();
        assert_eq!(&page[..10], &[7u8; 10]);
        assert!(page[10..].iter().all(|b| *b == 0));

        file.set_failing(true);
        assert_eq!(file.read_page(0, &mut page), Err(MemoryError::Io));
    }

    #[test]
    fn test_swap_roundtrip_and_free() {
        let swap = MemorySwap::new(1);
        let page = vec![3u8; PAGE_SIZE];
        let slot = swap.write_page(&page).unwrap();
        assert_eq!(swap.write_page(&page), Err(MemoryError::OutOfMemory));

        let mut back = vec![0u8; PAGE_SIZE];
        swap.read_page(slot, &mut back).unwrap();
        assert_eq!(back, page);

        swap.free(slot);
        assert_eq!(swap.used(), 0);
    }
}
