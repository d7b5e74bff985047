//! Scheduler module
//!
//! Per-CPU multi-level feedback scheduler: one real-time queue ordered by
//! priority, N round-robin normal bands, a batch queue, an idle-class queue
//! and the per-CPU idle thread.

pub mod affinity;
mod scheduler;
pub mod cpu;
pub mod mailbox;
pub mod policy;
pub mod runqueue;
pub mod stats;

pub use self::affinity::CpuMask;
pub use self::scheduler::{SchedSnapshot, SwitchReason};
pub use self::cpu::{CpuScheduler, CpuState};
pub use self::mailbox::{CpuRequest, Mailbox};
pub use self::policy::{SchedClass, SchedEntity, SchedParams, MAX_NICE, MAX_RT_PRIORITY, MIN_NICE};
pub use self::runqueue::RunQueue;
pub use self::stats::{CpuStats, CpuStatsSnapshot};
