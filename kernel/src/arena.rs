//! Generational arena
//!
//! Backing store for process and thread records. A `Handle` carries the slot
//! generation, so an id kept after its record was freed never aliases the
//! slot's next occupant.

use alloc::vec::Vec;
use core::fmt;

/// Slot index + generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Packed form: generation in the high half, index + 1 in the low half
    ///
    /// Never zero, so user space may use 0 as "none".
    pub const fn raw(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64 + 1)
    }

    pub const fn from_raw(raw: u64) -> Option<Self> {
        let low = (raw & 0xFFFF_FFFF) as u32;
        if low == 0 {
            return None;
        }
        Some(Self { index: low - 1, generation: (raw >> 32) as u32 })
    }

    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "{}", self.index + 1)
        } else {
            write!(f, "{}.{}", self.index + 1, self.generation)
        }
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Slab of `T` addressed by generational handles
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub const fn new() -> Self {
        Self { slots: Vec::new(), free_head: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Handle the next insertion will return
    fn next_handle(&self) -> Handle {
        match self.free_head {
            Some(index) => match &self.slots[index as usize] {
                Slot::Vacant { generation, .. } => Handle { index, generation: *generation },
                Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
            },
            None => Handle { index: self.slots.len() as u32, generation: 0 },
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.insert_with(|_| value)
    }

    /// Insert a value that needs to know its own handle
    pub fn insert_with(&mut self, build: impl FnOnce(Handle) -> T) -> Handle {
        let handle = self.next_handle();
        let value = build(handle);
        let slot = Slot::Occupied { generation: handle.generation, value };
        if handle.index() == self.slots.len() {
            self.slots.push(slot);
        } else {
            let previous = core::mem::replace(&mut self.slots[handle.index()], slot);
            if let Slot::Vacant { next_free, .. } = previous {
                self.free_head = next_free;
            }
        }
        self.len += 1;
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index())? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index())? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Free the slot and bump its generation
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.get(handle)?;
        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let previous = core::mem::replace(&mut self.slots[handle.index()], vacant);
        self.free_head = Some(handle.index);
        self.len -= 1;
        match previous {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { generation, value } => {
                Some((Handle { index: index as u32, generation: *generation }, value))
            }
            Slot::Vacant { .. } => None,
        })
    }
}
