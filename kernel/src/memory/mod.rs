//! Gestion mémoire des processus
//!
//! Espaces d'adressage, pool de frames physiques, magasins de sauvegarde
//! (fichiers, swap) et pages partagées. Le coeur ne manipule jamais de
//! tables de pages matérielles : il tient une table logicielle par espace et
//! résout les fautes comme le ferait le gestionnaire matériel.

use core::fmt;

use crate::error::KernelError;

mod address_space;
mod backing;
mod frame;
mod region;
mod shared;

pub use address_space::{AccessKind, AddressSpace, AddressSpaceStats, FaultError};
pub use backing::{BackingStore, MemoryFile, MemorySwap, SwapDevice, SwapSlot};
pub use frame::{Frame, FramePool, FrameRef};
pub use region::{Backing, Protection, Region, RegionKind};
pub use shared::SharedPages;

/// Taille d'une page
pub const PAGE_SIZE: usize = 4096;

/// Première adresse utilisateur (la page nulle et ses voisines restent libres)
pub const USER_BASE: u64 = 0x1_0000;

/// Fin (exclusive) de la moitié basse canonique
pub const USER_TOP: u64 = 0x0000_8000_0000_0000;

/// Arrondi à la page inférieure
pub const fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

/// Arrondi à la page supérieure
pub const fn page_align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

pub const fn is_page_aligned(addr: u64) -> bool {
    addr % PAGE_SIZE as u64 == 0
}

/// Erreurs de la couche mémoire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Plus de frames disponibles
    OutOfMemory,
    /// Adresse ou taille non alignée, ou hors de l'espace utilisateur
    InvalidRange,
    /// Chevauchement avec une région existante
    Overlap,
    /// Aucune région ne couvre l'adresse
    NotMapped,
    /// Le mapping dépasserait la limite mémoire du processus
    LimitExceeded,
    /// Échec du magasin de sauvegarde ou du swap
    Io,
    /// L'espace d'adressage a été détruit
    Destroyed,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OutOfMemory => write!(f, "Out of memory"),
            MemoryError::InvalidRange => write!(f, "Invalid range"),
            MemoryError::Overlap => write!(f, "Overlapping region"),
            MemoryError::NotMapped => write!(f, "Not mapped"),
            MemoryError::LimitExceeded => write!(f, "Memory limit exceeded"),
            MemoryError::Io => write!(f, "Backing store I/O error"),
            MemoryError::Destroyed => write!(f, "Address space destroyed"),
        }
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;

impl From<MemoryError> for KernelError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::OutOfMemory | MemoryError::Destroyed => KernelError::NoMemory,
            MemoryError::InvalidRange | MemoryError::Overlap => KernelError::InvalidArgument,
            MemoryError::NotMapped => KernelError::BadAddress,
            MemoryError::LimitExceeded => KernelError::LimitExceeded,
            MemoryError::Io => KernelError::Io,
        }
    }
}

/// Faute vue depuis un appel système : jamais de signal, une erreur
impl From<FaultError> for KernelError {
    fn from(err: FaultError) -> Self {
        match err {
            FaultError::Segfault => KernelError::BadAddress,
            FaultError::Oom => KernelError::NoMemory,
            FaultError::Io => KernelError::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(page_align_down(0x1fff), 0x1000);
        assert_eq!(page_align_up(0x1001), 0x2000);
        assert_eq!(page_align_up(0x2000), 0x2000);
        assert!(is_page_aligned(0x3000));
        assert!(!is_page_aligned(0x3001));
    }

    #[test]
    fn test_memory_error_conversion() {
        assert_eq!(KernelError::from(MemoryError::OutOfMemory), KernelError::NoMemory);
        assert_eq!(KernelError::from(MemoryError::LimitExceeded), KernelError::LimitExceeded);
        assert_eq!(KernelError::from(MemoryError::NotMapped), KernelError::BadAddress);
        assert_eq!(KernelError::from(FaultError::Segfault), KernelError::BadAddress);
    }
}
