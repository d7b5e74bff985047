//! Pages partagées
//!
//! Ensemble de frames allouées d'avance et mappables dans plusieurs espaces.
//! Les écritures d'un processus sont visibles de tous les autres.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{page_align_up, FramePool, FrameRef, MemoryResult, PAGE_SIZE};

pub struct SharedPages {
    frames: Vec<FrameRef>,
    size: usize,
}

impl SharedPages {
    /// Alloue toutes les frames; tout ou rien
    pub fn new(pool: &FramePool, size: usize) -> MemoryResult<Arc<Self>> {
        let pages = page_align_up(size as u64) as usize / PAGE_SIZE;
        let mut frames = Vec::with_capacity(pages);
        for _ in 0..pages {
            frames.push(pool.alloc_zeroed()?);
        }
        Ok(Arc::new(Self { frames, size }))
    }

    pub fn frame(&self, index: usize) -> Option<FrameRef> {
        self.frames.get(index).cloned()
    }

    pub fn page_count(&self) -> usize {
        self.frames.len()
    }

    /// Taille demandée à la création
    pub fn size(&self) -> usize {
        self.size
    }
}
