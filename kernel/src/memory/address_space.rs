//! # Espaces d'Adressage par Processus
//!
//! Régions sans chevauchement plus une table de pages logicielle. Les pages
//! sont matérialisées à la faute : zéro (anonyme), lecture fichier, frame
//! partagée, retour du swap ou copie copy-on-write.
//!
//! Une page privée présente mais non inscriptible dans une région
//! inscriptible est une page copy-on-write.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};

use super::{
    is_page_aligned, page_align_down, Backing, FramePool, FrameRef, MemoryError, MemoryResult,
    Protection, Region, RegionKind, SwapDevice, SwapSlot, PAGE_SIZE, USER_BASE, USER_TOP,
};
use crate::arch::PageTableRoot;

/// Nature de l'accès qui a fauté
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// Résultat d'une faute non résolue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// Aucune région, ou permission refusée
    Segfault,
    /// Plus de frames
    Oom,
    /// Le magasin de sauvegarde a échoué
    Io,
}

enum Pte {
    Present { frame: FrameRef, writable: bool },
    Swapped(SwapSlot),
}

/// Statistiques d'un espace d'adressage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressSpaceStats {
    pub page_faults: u64,
    pub zero_fills: u64,
    pub file_reads: u64,
    pub cow_copies: u64,
    pub swap_ins: u64,
    pub swap_outs: u64,
}

static NEXT_ROOT: AtomicU64 = AtomicU64::new(1);

pub struct AddressSpace {
    root: PageTableRoot,
    regions: BTreeMap<u64, Region>,
    ptes: BTreeMap<u64, Pte>,
    frames: FramePool,
    swap: Option<Arc<dyn SwapDevice>>,
    memory_limit: Option<usize>,
    mapped: usize,
    destroyed: bool,
    stats: AddressSpaceStats,
}

fn find_region(regions: &BTreeMap<u64, Region>, addr: u64) -> Option<&Region> {
    regions
        .range(..=addr)
        .next_back()
        .map(|(_, region)| region)
        .filter(|region| region.contains(addr))
}

fn permits(prot: Protection, access: AccessKind) -> bool {
    match access {
        AccessKind::Read => prot.contains(Protection::READ),
        AccessKind::Write => prot.contains(Protection::WRITE),
        AccessKind::Execute => prot.contains(Protection::EXEC),
    }
}

impl AddressSpace {
    /// Crée un espace vide avec sa propre racine de tables
    pub fn new(frames: FramePool, swap: Option<Arc<dyn SwapDevice>>) -> Self {
        let root = PageTableRoot(NEXT_ROOT.fetch_add(1, Ordering::Relaxed) << 12);
        Self::with_root(root, frames, swap)
    }

    /// Espace des threads noyau (tables noyau partagées, aucune région)
    pub fn kernel(frames: FramePool) -> Self {
        Self::with_root(PageTableRoot::KERNEL, frames, None)
    }

    fn with_root(root: PageTableRoot, frames: FramePool, swap: Option<Arc<dyn SwapDevice>>) -> Self {
        Self {
            root,
            regions: BTreeMap::new(),
            ptes: BTreeMap::new(),
            frames,
            swap,
            memory_limit: None,
            mapped: 0,
            destroyed: false,
            stats: AddressSpaceStats::default(),
        }
    }

    pub fn root(&self) -> PageTableRoot {
        self.root
    }

    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.memory_limit = limit;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn stats(&self) -> AddressSpaceStats {
        self.stats
    }

    /// Octets mappés (toutes régions)
    pub fn mapped_bytes(&self) -> usize {
        self.mapped
    }

    /// Pages présentes en mémoire
    pub fn resident_pages(&self) -> usize {
        self.ptes.values().filter(|pte| matches!(pte, Pte::Present { .. })).count()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> + '_ {
        self.regions.values()
    }

    pub fn region_at(&self, addr: u64) -> Option<&Region> {
        find_region(&self.regions, addr)
    }

    /// Frame actuellement mappée à `addr`, sans provoquer de faute
    pub fn frame_at(&self, addr: u64) -> Option<FrameRef> {
        match self.ptes.get(&page_align_down(addr))? {
            Pte::Present { frame, .. } => Some(frame.clone()),
            Pte::Swapped(_) => None,
        }
    }

    pub fn is_swapped(&self, addr: u64) -> bool {
        matches!(self.ptes.get(&page_align_down(addr)), Some(Pte::Swapped(_)))
    }

    // ═══════════════════════════════════════════════════════════════
    // Régions
    // ═══════════════════════════════════════════════════════════════

    /// Mappe une région à une adresse fixe
    pub fn map(
        &mut self,
        start: u64,
        size: usize,
        prot: Protection,
        kind: RegionKind,
        backing: Backing,
    ) -> MemoryResult<u64> {
        if self.destroyed {
            return Err(MemoryError::Destroyed);
        }
        if size == 0 || !is_page_aligned(start) || size % PAGE_SIZE != 0 {
            return Err(MemoryError::InvalidRange);
        }
        let end = start.checked_add(size as u64).ok_or(MemoryError::InvalidRange)?;
        if start < USER_BASE || end > USER_TOP {
            return Err(MemoryError::InvalidRange);
        }
        match &backing {
            Backing::File { offset, .. } if !is_page_aligned(*offset) => {
                return Err(MemoryError::InvalidRange);
            }
            Backing::Shared { pages } if size > pages.page_count() * PAGE_SIZE => {
                return Err(MemoryError::InvalidRange);
            }
            _ => {}
        }
        if self.regions.values().any(|region| region.overlaps(start, size)) {
            return Err(MemoryError::Overlap);
        }
        if let Some(limit) = self.memory_limit {
            if self.mapped + size > limit {
                return Err(MemoryError::LimitExceeded);
            }
        }

        self.regions.insert(start, Region::new(start, size, prot, kind, backing));
        self.mapped += size;
        Ok(start)
    }

    /// Mappe une région dans le plus haut trou libre, une page de garde en dessous
    pub fn map_anywhere(
        &mut self,
        size: usize,
        prot: Protection,
        kind: RegionKind,
        backing: Backing,
    ) -> MemoryResult<u64> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(MemoryError::InvalidRange);
        }
        let guard = PAGE_SIZE as u64;
        let need = size as u64 + guard;
        // `hi` reste sous la page de garde de la région du dessus
        let mut hi = USER_TOP - guard;
        let mut found = None;
        for region in self.regions.values().rev() {
            if region.end() <= hi && hi - region.end() >= need {
                found = Some(hi - size as u64);
                break;
            }
            hi = hi.min(region.start.saturating_sub(guard));
        }
        let start = match found {
            Some(start) => start,
            None if hi >= USER_BASE && hi - USER_BASE >= need => hi - size as u64,
            None => return Err(MemoryError::OutOfMemory),
        };
        self.map(start, size, prot, kind, backing)
    }

    /// Retire la région qui commence à `start`
    pub fn unmap(&mut self, start: u64) -> MemoryResult<()> {
        let region = self.regions.remove(&start).ok_or(MemoryError::NotMapped)?;
        let pages: alloc::vec::Vec<u64> =
            self.ptes.range(region.start..region.end()).map(|(page, _)| *page).collect();
        for page in pages {
            if let Some(Pte::Swapped(slot)) = self.ptes.remove(&page) {
                if let Some(swap) = &self.swap {
                    swap.free(slot);
                }
            }
        }
        self.mapped -= region.size;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // Cycle de vie
    // ═══════════════════════════════════════════════════════════════

    /// Duplique l'espace pour un fork
    ///
    /// Les pages privées inscriptibles deviennent copy-on-write des deux
    /// côtés; les régions partagées restent partagées; les pages dans le
    /// swap reçoivent leur propre emplacement.
    pub fn clone_cow(&mut self) -> MemoryResult<AddressSpace> {
        if self.destroyed {
            return Err(MemoryError::Destroyed);
        }
        let mut child = AddressSpace::new(self.frames.clone(), self.swap.clone());
        child.memory_limit = self.memory_limit;
        child.regions = self.regions.clone();
        child.mapped = self.mapped;

        for (page, pte) in self.ptes.iter_mut() {
            let private = find_region(&self.regions, *page).map_or(true, Region::is_private);
            let child_pte = match pte {
                Pte::Present { frame, writable } => {
                    if private {
                        *writable = false;
                    }
                    Pte::Present { frame: frame.clone(), writable: *writable }
                }
                Pte::Swapped(slot) => {
                    let swap = self.swap.as_ref().ok_or(MemoryError::Io)?;
                    let mut buf = vec![0u8; PAGE_SIZE];
                    swap.read_page(*slot, &mut buf)?;
                    Pte::Swapped(swap.write_page(&buf)?)
                }
            };
            child.ptes.insert(*page, child_pte);
        }
        Ok(child)
    }

    /// Libère toutes les pages; idempotent
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.regions.clear();
        for (_, pte) in core::mem::take(&mut self.ptes) {
            if let Pte::Swapped(slot) = pte {
                if let Some(swap) = &self.swap {
                    swap.free(slot);
                }
            }
        }
        self.mapped = 0;
    }

    // ═══════════════════════════════════════════════════════════════
    // Fautes
    // ═══════════════════════════════════════════════════════════════

    /// Résout une faute de page à `addr`
    pub fn handle_fault(&mut self, addr: u64, access: AccessKind) -> Result<(), FaultError> {
        self.fault_in(addr, access)
    }

    fn fault_in(&mut self, addr: u64, access: AccessKind) -> Result<(), FaultError> {
        if self.destroyed {
            return Err(FaultError::Segfault);
        }
        let region = find_region(&self.regions, addr).ok_or(FaultError::Segfault)?;
        if !permits(region.prot, access) {
            return Err(FaultError::Segfault);
        }
        self.stats.page_faults += 1;

        let page = page_align_down(addr);
        let region_writable = region.prot.contains(Protection::WRITE);
        let new_pte = match self.ptes.get(&page) {
            Some(Pte::Present { frame, writable }) => {
                if access != AccessKind::Write || *writable {
                    return Ok(());
                }
                // Copy-on-write: copier seulement si la frame est encore partagée
                let frame = if Arc::strong_count(frame) > 1 {
                    let copy = self.frames.alloc_copy(frame).map_err(|_| FaultError::Oom)?;
                    self.stats.cow_copies += 1;
                    copy
                } else {
                    frame.clone()
                };
                Pte::Present { frame, writable: true }
            }
            Some(Pte::Swapped(slot)) => {
                let slot = *slot;
                let swap = self.swap.clone().ok_or(FaultError::Io)?;
                let frame = self.frames.alloc_zeroed().map_err(|_| FaultError::Oom)?;
                let mut buf = vec![0u8; PAGE_SIZE];
                swap.read_page(slot, &mut buf).map_err(|_| FaultError::Io)?;
                frame.write(0, &buf);
                swap.free(slot);
                self.stats.swap_ins += 1;
                Pte::Present { frame, writable: region_writable }
            }
            None => match &region.backing {
                Backing::Anonymous => {
                    let frame = self.frames.alloc_zeroed().map_err(|_| FaultError::Oom)?;
                    self.stats.zero_fills += 1;
                    Pte::Present { frame, writable: region_writable }
                }
                Backing::File { store, offset } => {
                    let frame = self.frames.alloc_zeroed().map_err(|_| FaultError::Oom)?;
                    let mut buf = vec![0u8; PAGE_SIZE];
                    store
                        .read_page(offset + (page - region.start), &mut buf)
                        .map_err(|_| FaultError::Io)?;
                    frame.write(0, &buf);
                    self.stats.file_reads += 1;
                    Pte::Present { frame, writable: region_writable }
                }
                Backing::Shared { pages } => {
                    let frame = pages.frame(region.page_index(page)).ok_or(FaultError::Segfault)?;
                    Pte::Present { frame, writable: region.prot.contains(Protection::WRITE) }
                }
            },
        };
        self.ptes.insert(page, new_pte);
        Ok(())
    }

    /// Frame accessible pour `access` à `addr`, en fautant au besoin
    fn resolve(&mut self, addr: u64, access: AccessKind) -> Result<FrameRef, FaultError> {
        for _ in 0..2 {
            let page = page_align_down(addr);
            if let Some(Pte::Present { frame, writable }) = self.ptes.get(&page) {
                let permitted = find_region(&self.regions, addr).map_or(false, |r| permits(r.prot, access));
                if permitted && (access != AccessKind::Write || *writable) {
                    return Ok(frame.clone());
                }
            }
            self.fault_in(addr, access)?;
        }
        Err(FaultError::Segfault)
    }

    // ═══════════════════════════════════════════════════════════════
    // Accès comme le ferait le CPU
    // ═══════════════════════════════════════════════════════════════

    /// Lit `buf.len()` octets à `addr` avec les droits utilisateur
    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = addr + done as u64;
            let offset = (cur - page_align_down(cur)) as usize;
            let chunk = (PAGE_SIZE - offset).min(buf.len() - done);
            let frame = self.resolve(cur, AccessKind::Read)?;
            frame.read(offset, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Écrit `data` à `addr` avec les droits utilisateur
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < data.len() {
            let cur = addr + done as u64;
            let offset = (cur - page_align_down(cur)) as usize;
            let chunk = (PAGE_SIZE - offset).min(data.len() - done);
            let frame = self.resolve(cur, AccessKind::Write)?;
            frame.write(offset, &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Rend `[addr, addr + len)` accessible pour `access` sans rien copier
    ///
    /// Après succès, un accès de ce type sur la plage ne peut plus fauter
    /// tant que l'espace n'est pas modifié.
    pub fn prefault(&mut self, addr: u64, len: usize, access: AccessKind) -> Result<(), FaultError> {
        if len == 0 {
            return Ok(());
        }
        let end = addr.checked_add(len as u64).ok_or(FaultError::Segfault)?;
        let mut page = page_align_down(addr);
        while page < end {
            self.resolve(page.max(addr), access)?;
            page += PAGE_SIZE as u64;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // Swap
    // ═══════════════════════════════════════════════════════════════

    /// Évince la page privée présente à `addr` vers le swap
    pub fn swap_out(&mut self, addr: u64) -> MemoryResult<()> {
        let page = page_align_down(addr);
        let region = find_region(&self.regions, addr).ok_or(MemoryError::NotMapped)?;
        if !region.is_private() || !region.swappable {
            return Err(MemoryError::InvalidRange);
        }
        let swap = self.swap.clone().ok_or(MemoryError::Io)?;
        let frame = match self.ptes.get(&page) {
            Some(Pte::Present { frame, .. }) => frame.clone(),
            _ => return Err(MemoryError::NotMapped),
        };
        let slot = swap.write_page(&frame.contents())?;
        self.ptes.insert(page, Pte::Swapped(slot));
        self.stats.swap_outs += 1;
        Ok(())
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFile, MemorySwap, SharedPages};

    const BASE: u64 = 0x40_0000;

    fn space(frames: usize) -> (FramePool, AddressSpace) {
        let pool = FramePool::new(frames);
        let swap: Arc<dyn SwapDevice> = Arc::new(MemorySwap::new(16));
        let space = AddressSpace::new(pool.clone(), Some(swap));
        (pool, space)
    }

    #[test]
    fn test_lazy_zero_fill() {
        let (pool, mut space) = space(8);
        space.map(BASE, 2 * PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous).unwrap();
        assert_eq!(pool.allocated(), 0);

        let mut buf = [0xFFu8; 4];
        space.read(BASE + 10, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
        assert_eq!(pool.allocated(), 1);
        assert_eq!(space.stats().zero_fills, 1);
    }

    #[test]
    fn test_unmapped_and_protection_faults() {
        let (_, mut space) = space(8);
        space.map(BASE, PAGE_SIZE, Protection::READ, RegionKind::Data, Backing::Anonymous).unwrap();
        assert_eq!(space.handle_fault(BASE + 2 * PAGE_SIZE as u64, AccessKind::Read), Err(FaultError::Segfault));
        assert_eq!(space.write(BASE, b"x"), Err(FaultError::Segfault));
        assert_eq!(space.handle_fault(BASE, AccessKind::Execute), Err(FaultError::Segfault));
    }

    #[test]
    fn test_overlap_and_alignment_rejected() {
        let (_, mut space) = space(8);
        space.map(BASE, 2 * PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous).unwrap();
        assert_eq!(
            space.map(BASE + PAGE_SIZE as u64, PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous),
            Err(MemoryError::Overlap)
        );
        assert_eq!(
            space.map(BASE + 3, PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous),
            Err(MemoryError::InvalidRange)
        );
        assert_eq!(
            space.map(0, PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous),
            Err(MemoryError::InvalidRange)
        );
    }

    #[test]
    fn test_map_anywhere_leaves_guard() {
        let (_, mut space) = space(8);
        let a = space.map_anywhere(PAGE_SIZE, Protection::RW, RegionKind::Stack, Backing::Anonymous).unwrap();
        let b = space.map_anywhere(PAGE_SIZE, Protection::RW, RegionKind::Stack, Backing::Anonymous).unwrap();
        assert!(b + (PAGE_SIZE as u64) < a);
        assert_eq!(a + PAGE_SIZE as u64, USER_TOP - PAGE_SIZE as u64);
        // La page sous `a` n'appartient à personne
        assert_eq!(space.handle_fault(a - 1, AccessKind::Write), Err(FaultError::Segfault));
        assert!(space.region_at(b + PAGE_SIZE as u64).is_none());
    }

    #[test]
    fn test_prefault_covers_range_or_nothing_usable() {
        let (pool, mut space) = space(8);
        space.map(BASE, 2 * PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous).unwrap();
        space.prefault(BASE + 10, PAGE_SIZE, AccessKind::Write).unwrap();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(
            space.prefault(BASE + PAGE_SIZE as u64, 2 * PAGE_SIZE, AccessKind::Write),
            Err(FaultError::Segfault)
        );
        assert_eq!(space.prefault(u64::MAX - 4, 8, AccessKind::Read), Err(FaultError::Segfault));
        space.write(BASE + PAGE_SIZE as u64 - 2, &[7; 4]).unwrap();
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn test_memory_limit() {
        let (_, mut space) = space(8);
        space.set_memory_limit(Some(PAGE_SIZE));
        space.map(BASE, PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous).unwrap();
        assert_eq!(
            space.map(BASE + 0x10000, PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous),
            Err(MemoryError::LimitExceeded)
        );
    }

    #[test]
    fn test_cow_isolation_after_clone() {
        let (pool, mut parent) = space(8);
        parent.map(BASE, PAGE_SIZE, Protection::RW, RegionKind::Data, Backing::Anonymous).unwrap();
        parent.write(BASE, b"parent").unwrap();

        let mut child = parent.clone_cow().unwrap();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(parent.frame_at(BASE).unwrap().number(), child.frame_at(BASE).unwrap().number());

        child.write(BASE, b"child!").unwrap();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(child.stats().cow_copies, 1);

        let mut buf = [0u8; 6];
        parent.read(BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        child.read(BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"child!");

        // Sole owner now: the parent's write fault just re-enables writing
        parent.write(BASE, b"again!").unwrap();
        assert_eq!(parent.stats().cow_copies, 0);
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn test_cow_copy_out_of_memory() {
        let (_, mut parent) = space(1);
        parent.map(BASE, PAGE_SIZE, Protection::RW, RegionKind::Data, Backing::Anonymous).unwrap();
        parent.write(BASE, b"a").unwrap();
        let _child = parent.clone_cow().unwrap();
        assert_eq!(parent.handle_fault(BASE, AccessKind::Write), Err(FaultError::Oom));
    }

    #[test]
    fn test_shared_region_stays_shared() {
        let (pool, mut a) = space(8);
        let pages = SharedPages::new(&pool, PAGE_SIZE).unwrap();
        a.map(BASE, PAGE_SIZE, Protection::RW, RegionKind::Shared, Backing::Shared { pages }).unwrap();
        let mut b = a.clone_cow().unwrap();
        b.write(BASE, b"shared").unwrap();
        let mut buf = [0u8; 6];
        a.read(BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"shared");
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_file_backed_fault() {
        let (_, mut space) = space(8);
        let file = Arc::new(MemoryFile::new("lib", b"ELF!payload".to_vec()));
        let store: Arc<dyn crate::memory::BackingStore> = file.clone();
        space
            .map(BASE, PAGE_SIZE, Protection::RX, RegionKind::Code, Backing::File { store, offset: 0 })
            .unwrap();
        let mut buf = [0u8; 4];
        space.read(BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"ELF!");
        assert_eq!(space.stats().file_reads, 1);

        file.set_failing(true);
        space.map(BASE + 0x10000, PAGE_SIZE, Protection::READ, RegionKind::Mmap, Backing::File {
            store: file.clone(),
            offset: 0,
        })
        .unwrap();
        assert_eq!(space.handle_fault(BASE + 0x10000, AccessKind::Read), Err(FaultError::Io));
    }

    #[test]
    fn test_swap_out_and_in() {
        let (pool, mut space) = space(8);
        space.map(BASE, PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous).unwrap();
        space.write(BASE, b"persist").unwrap();
        space.swap_out(BASE).unwrap();
        assert!(space.is_swapped(BASE));
        assert_eq!(pool.allocated(), 0);

        let mut buf = [0u8; 7];
        space.read(BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"persist");
        assert_eq!(space.stats().swap_ins, 1);
    }

    #[test]
    fn test_clone_duplicates_swap_slot() {
        let (_, mut parent) = space(8);
        parent.map(BASE, PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous).unwrap();
        parent.write(BASE, b"swapped").unwrap();
        parent.swap_out(BASE).unwrap();
        let mut child = parent.clone_cow().unwrap();
        child.write(BASE, b"CHILD").unwrap();
        let mut buf = [0u8; 7];
        parent.read(BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"swapped");
    }

    #[test]
    fn test_destroy_is_idempotent_and_frees() {
        let (pool, mut space) = space(8);
        space.map(BASE, 2 * PAGE_SIZE, Protection::RW, RegionKind::Heap, Backing::Anonymous).unwrap();
        space.write(BASE, &[1u8; PAGE_SIZE + 1]).unwrap();
        assert_eq!(pool.allocated(), 2);
        space.destroy();
        space.destroy();
        assert_eq!(pool.allocated(), 0);
        assert_eq!(space.mapped_bytes(), 0);
        assert_eq!(space.handle_fault(BASE, AccessKind::Read), Err(FaultError::Segfault));
    }
}
