//! CPU affinity
//!
//! Set of CPUs a thread may be queued on. Bits past the online CPU count are
//! ignored by placement.

/// One bit per CPU, 64 CPUs max
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuMask(u64);

impl CpuMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every CPU, including ones not online
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    pub const fn single(cpu: usize) -> Self {
        Self(1 << (cpu & 63))
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Allow `cpu`
    pub fn set(&mut self, cpu: usize) {
        self.0 |= 1 << (cpu & 63);
    }

    /// Forbid `cpu`
    pub fn clear(&mut self, cpu: usize) {
        self.0 &= !(1 << (cpu & 63));
    }

    /// Whether `cpu` is allowed
    pub fn is_set(&self, cpu: usize) -> bool {
        cpu < 64 && (self.0 & (1 << cpu)) != 0
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Lowest allowed CPU
    pub fn first(&self) -> Option<usize> {
        (self.0 != 0).then(|| self.0.trailing_zeros() as usize)
    }

    /// Restrict to CPUs 0..cpus
    pub fn online(&self, cpus: usize) -> Self {
        let online = if cpus >= 64 { u64::MAX } else { (1u64 << cpus) - 1 };
        Self(self.0 & online)
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ops() {
        let mut mask = CpuMask::empty();
        mask.set(3);
        mask.set(5);
        assert!(mask.is_set(3));
        assert!(!mask.is_set(4));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.first(), Some(3));
        mask.clear(3);
        assert_eq!(mask.first(), Some(5));
    }

    #[test]
    fn test_online_restriction() {
        assert_eq!(CpuMask::all().online(2).bits(), 0b11);
        assert!(CpuMask::single(4).online(2).is_empty());
        assert_eq!(CpuMask::all().online(64), CpuMask::all());
    }
}
