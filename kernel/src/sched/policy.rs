//! Scheduling policy - classes, bands, ranks and time slices
//!
//! Bands from most to least urgent: real-time (priority 0..=99, higher wins),
//! normal bands N-1..0 (higher index wins), batch, idle. Every thread maps to
//! a single `rank`; a larger rank always preempts a smaller one.

use crate::arch::CpuId;
use crate::config::{KernelConfig, MAX_NORMAL_BANDS};
use crate::error::{KernelError, KernelResult};
use crate::time::{Duration, Timestamp};

use super::CpuMask;

/// Highest real-time priority
pub const MAX_RT_PRIORITY: u8 = 99;

pub const MIN_NICE: i8 = -20;
pub const MAX_NICE: i8 = 19;

/// Scheduling class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedClass {
    Realtime,
    Normal,
    Batch,
    Idle,
}

/// Per-thread scheduling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedParams {
    pub class: SchedClass,
    /// Real-time priority or normal band, depending on class
    pub priority: u8,
    /// Shifts the effective normal band (negative = more urgent)
    pub nice: i8,
}

impl SchedParams {
    pub const fn normal(band: u8) -> Self {
        Self { class: SchedClass::Normal, priority: band, nice: 0 }
    }

    pub const fn realtime(priority: u8) -> Self {
        Self { class: SchedClass::Realtime, priority, nice: 0 }
    }

    pub const fn batch() -> Self {
        Self { class: SchedClass::Batch, priority: 0, nice: 0 }
    }

    pub const fn idle() -> Self {
        Self { class: SchedClass::Idle, priority: 0, nice: 0 }
    }

    pub fn with_nice(mut self, nice: i8) -> Self {
        self.nice = nice;
        self
    }

    pub fn validate(&self, bands: usize) -> KernelResult<()> {
        if self.nice < MIN_NICE || self.nice > MAX_NICE {
            return Err(KernelError::InvalidArgument);
        }
        match self.class {
            SchedClass::Realtime if self.priority > MAX_RT_PRIORITY => Err(KernelError::InvalidArgument),
            SchedClass::Normal if self.priority as usize >= bands => Err(KernelError::InvalidArgument),
            _ => Ok(()),
        }
    }

    /// Normal band after applying nice
    pub fn effective_band(&self, bands: usize) -> usize {
        let band = self.priority as i32 - self.nice as i32;
        band.clamp(0, bands as i32 - 1) as usize
    }

    /// Total order over all classes
    pub fn rank(&self, bands: usize) -> u32 {
        match self.class {
            SchedClass::Idle => 0,
            SchedClass::Batch => 1,
            SchedClass::Normal => 2 + self.effective_band(bands) as u32,
            SchedClass::Realtime => 2 + MAX_NORMAL_BANDS as u32 + self.priority as u32,
        }
    }

    /// Slice granted at dispatch; `None` never expires
    pub fn time_slice(&self, config: &KernelConfig) -> Option<Duration> {
        match self.class {
            SchedClass::Realtime | SchedClass::Idle => None,
            SchedClass::Batch => Some(config.batch_slice),
            SchedClass::Normal => {
                let band = self.effective_band(config.normal_bands) as u64;
                let half = (config.normal_bands as u64 / 2).max(1);
                let scaled = config.time_slice_base.as_ns() * half / (band + 1);
                let clamped = scaled.clamp(config.min_slice.as_ns(), config.max_slice.as_ns());
                Some(Duration::from_ns(clamped))
            }
        }
    }
}

impl Default for SchedParams {
    fn default() -> Self {
        Self::normal(15)
    }
}

/// Scheduler bookkeeping carried by every thread
#[derive(Debug, Clone)]
pub struct SchedEntity {
    pub params: SchedParams,
    pub rank: u32,
    pub slice: Option<Duration>,
    pub remaining: Duration,
    pub last_scheduled: Timestamp,
    pub last_cpu: Option<CpuId>,
    /// CPU whose run-queue currently holds the thread
    pub queued_on: Option<CpuId>,
    pub affinity: CpuMask,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub dispatches: u64,
}

impl SchedEntity {
    pub fn new(params: SchedParams, config: &KernelConfig) -> Self {
        let slice = params.time_slice(config);
        Self {
            params,
            rank: params.rank(config.normal_bands),
            slice,
            remaining: slice.unwrap_or(Duration::MAX),
            last_scheduled: Timestamp::ZERO,
            last_cpu: None,
            queued_on: None,
            affinity: CpuMask::all(),
            voluntary_switches: 0,
            involuntary_switches: 0,
            dispatches: 0,
        }
    }

    pub fn set_params(&mut self, params: SchedParams, config: &KernelConfig) {
        self.params = params;
        self.rank = params.rank(config.normal_bands);
        self.slice = params.time_slice(config);
    }

    /// Grant a fresh slice
    pub fn refill(&mut self) {
        self.remaining = self.slice.unwrap_or(Duration::MAX);
    }

    pub fn is_realtime(&self) -> bool {
        self.params.class == SchedClass::Realtime
    }
}
