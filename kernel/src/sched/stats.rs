//! Scheduler statistics
//!
//! Per-CPU counters, updated lock-free.

use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CpuStats {
    pub ticks: AtomicU64,
    pub idle_ticks: AtomicU64,
    pub context_switches: AtomicU64,
    pub preemptions: AtomicU64,
    pub yields: AtomicU64,
    pub ipis_handled: AtomicU64,
    pub requests_drained: AtomicU64,
}

impl CpuStats {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            ipis_handled: AtomicU64::new(0),
            requests_drained: AtomicU64::new(0),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CpuStatsSnapshot {
        CpuStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            ipis_handled: self.ipis_handled.load(Ordering::Relaxed),
            requests_drained: self.requests_drained.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CpuStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStatsSnapshot {
    pub ticks: u64,
    pub idle_ticks: u64,
    pub context_switches: u64,
    pub preemptions: u64,
    pub yields: u64,
    pub ipis_handled: u64,
    pub requests_drained: u64,
}

impl CpuStatsSnapshot {
    /// Share of ticks spent idle, in percent
    pub fn idle_percent(&self) -> u64 {
        if self.ticks == 0 {
            return 0;
        }
        self.idle_ticks * 100 / self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = CpuStats::new();
        CpuStats::bump(&stats.ticks);
        CpuStats::bump(&stats.ticks);
        CpuStats::bump(&stats.idle_ticks);
        let snap = stats.snapshot();
        assert_eq!(snap.ticks, 2);
        assert_eq!(snap.idle_percent(), 50);
        assert_eq!(CpuStatsSnapshot::default().idle_percent(), 0);
    }
}
