//! Shared-memory segments
//!
//! A segment owns its frames up front. Attaching maps them as a `Shared`
//! region of the caller's address space; the frames go back to the pool when
//! the last handle and the last mapping are gone.

use alloc::string::String;
use alloc::sync::Arc;

use crate::error::KernelResult;
use crate::memory::{page_align_up, Backing, FramePool, SharedPages};

pub struct SharedSegment {
    id: u64,
    name: Option<String>,
    owner: u32,
    pages: Arc<SharedPages>,
}

impl SharedSegment {
    /// Allocate a segment of `size` bytes; `NoMemory` if the frames run out
    pub fn new(pool: &FramePool, size: usize, name: Option<String>, owner: u32) -> KernelResult<Self> {
        let pages = SharedPages::new(pool, size)?;
        Ok(Self { id: super::next_object_id(), name, owner, pages })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Size requested at creation
    pub fn size(&self) -> usize {
        self.pages.size()
    }

    /// Size of a mapping of the whole segment
    pub fn mapped_size(&self) -> usize {
        page_align_up(self.pages.size() as u64) as usize
    }

    pub fn page_count(&self) -> usize {
        self.pages.page_count()
    }

    pub(crate) fn backing(&self) -> Backing {
        Backing::Shared { pages: self.pages.clone() }
    }

    /// Live mappings of this segment across all address spaces
    pub fn attachments(&self) -> usize {
        Arc::strong_count(&self.pages) - 1
    }
}
