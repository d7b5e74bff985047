//! Régions d'un espace d'adressage

use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;

use super::{BackingStore, SharedPages, PAGE_SIZE};

bitflags! {
    /// Permissions d'une région
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

impl Protection {
    pub const RW: Self = Self::READ.union(Self::WRITE);
    pub const RX: Self = Self::READ.union(Self::EXEC);
}

/// Type de région
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Code,
    Data,
    Heap,
    Stack,
    Mmap,
    Shared,
}

/// Source des pages d'une région
#[derive(Clone)]
pub enum Backing {
    /// Pages créées à zéro au premier accès
    Anonymous,
    /// Pages lues depuis un fichier au premier accès
    File { store: Arc<dyn BackingStore>, offset: u64 },
    /// Frames partagées avec d'autres espaces
    Shared { pages: Arc<SharedPages> },
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Anonymous => write!(f, "Anonymous"),
            Backing::File { offset, .. } => write!(f, "File(+{:#x})", offset),
            Backing::Shared { pages } => write!(f, "Shared({} pages)", pages.page_count()),
        }
    }
}

/// Une région mappée
#[derive(Debug, Clone)]
pub struct Region {
    pub start: u64,
    pub size: usize,
    pub prot: Protection,
    pub kind: RegionKind,
    pub backing: Backing,
    /// Les pages privées peuvent partir dans le swap
    pub swappable: bool,
}

impl Region {
    pub fn new(start: u64, size: usize, prot: Protection, kind: RegionKind, backing: Backing) -> Self {
        let swappable = !matches!(backing, Backing::Shared { .. });
        Self { start, size, prot, kind, backing, swappable }
    }

    /// Adresse de fin (exclusive)
    pub fn end(&self) -> u64 {
        self.start + self.size as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn overlaps(&self, start: u64, size: usize) -> bool {
        start < self.end() && self.start < start + size as u64
    }

    /// Les écritures restent locales à l'espace (copy-on-write après fork)
    pub fn is_private(&self) -> bool {
        !matches!(self.backing, Backing::Shared { .. })
    }

    /// Index de page relatif au début de la région
    pub fn page_index(&self, addr: u64) -> usize {
        ((addr - self.start) / PAGE_SIZE as u64) as usize
    }

    pub fn page_count(&self) -> usize {
        self.size / PAGE_SIZE
    }
}
