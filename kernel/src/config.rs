//! Kernel configuration
//!
//! Every tunable of the core in one place. `Kernel::boot` takes a validated
//! `KernelConfig`; there is no other initialization state.

use crate::error::{KernelError, KernelResult};
use crate::process::ResourceLimits;
use crate::sched::SchedParams;
use crate::time::Duration;

/// Upper bound on CPUs (affinity masks are 64 bits wide)
pub const MAX_CPUS: usize = 64;

/// Upper bound on normal priority bands
pub const MAX_NORMAL_BANDS: usize = 64;

/// Boot-time configuration of the core
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of CPUs brought up (ids 0..cpu_count)
    pub cpu_count: usize,
    /// Timer tick period
    pub tick_period: Duration,
    /// Number of normal priority bands
    pub normal_bands: usize,
    /// Time slice at the middle normal band
    pub time_slice_base: Duration,
    /// Time slice of batch threads
    pub batch_slice: Duration,
    /// Lower clamp of computed normal slices
    pub min_slice: Duration,
    /// Upper clamp of computed normal slices
    pub max_slice: Duration,
    /// Kernel stack size per thread (bytes, page multiple)
    pub kernel_stack_size: usize,
    /// Default user stack size for new threads (bytes, page multiple)
    pub user_stack_size: usize,
    /// Physical frames available to the core
    pub max_frames: usize,
    /// Limits installed on every new process
    pub default_limits: ResourceLimits,
    /// Default message queue capacity (messages)
    pub mq_capacity: usize,
    /// Default maximum message size (bytes)
    pub mq_max_message: usize,
    /// Pipe buffer capacity (bytes)
    pub pipe_capacity: usize,
    /// Signal payloads a thread may hold queued
    pub sigqueue_max: usize,
    /// Entry point of init's main thread
    pub init_entry: u64,
    /// Scheduling parameters of init's main thread
    pub init_params: SchedParams,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cpu_count: 1,
            tick_period: Duration::from_ms(1),
            normal_bands: 32,
            time_slice_base: Duration::from_ms(10),
            batch_slice: Duration::from_ms(50),
            min_slice: Duration::from_ms(1),
            max_slice: Duration::from_ms(50),
            kernel_stack_size: 16 * 1024,
            user_stack_size: 64 * 1024,
            max_frames: 16 * 1024,
            default_limits: ResourceLimits::default(),
            mq_capacity: 16,
            mq_max_message: 256,
            pipe_capacity: 4096,
            sigqueue_max: 64,
            init_entry: 0x40_0000,
            init_params: SchedParams::normal(15),
        }
    }
}

impl KernelConfig {
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpu_count = cpus;
        self
    }

    pub fn with_max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.default_limits = limits;
        self
    }

    pub fn with_init_params(mut self, params: SchedParams) -> Self {
        self.init_params = params;
        self
    }

    pub fn with_user_stack(mut self, bytes: usize) -> Self {
        self.user_stack_size = bytes;
        self
    }

    /// Reject configurations the core cannot run with
    pub fn validate(&self) -> KernelResult<()> {
        let page = crate::memory::PAGE_SIZE;
        let checks = [
            self.cpu_count >= 1 && self.cpu_count <= MAX_CPUS,
            self.normal_bands >= 1 && self.normal_bands <= MAX_NORMAL_BANDS,
            !self.tick_period.is_zero(),
            !self.min_slice.is_zero() && self.min_slice <= self.max_slice,
            self.kernel_stack_size >= 2 * page && self.kernel_stack_size % page == 0,
            self.user_stack_size >= page && self.user_stack_size % page == 0,
            self.max_frames > 0,
            self.mq_capacity > 0 && self.mq_max_message > 0,
            self.pipe_capacity > 0,
            self.init_params.validate(self.normal_bands).is_ok(),
        ];
        if checks.iter().all(|ok| *ok) {
            Ok(())
        } else {
            Err(KernelError::InvalidArgument)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KernelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.normal_bands, 32);
        assert_eq!(config.time_slice_base, Duration::from_ms(10));
        assert_eq!(config.pipe_capacity, 4096);
    }

    #[test]
    fn test_rejects_bad_cpu_count() {
        assert!(KernelConfig::default().with_cpus(0).validate().is_err());
        assert!(KernelConfig::default().with_cpus(MAX_CPUS + 1).validate().is_err());
        assert!(KernelConfig::default().with_cpus(4).validate().is_ok());
    }

    #[test]
    fn test_rejects_unaligned_stack() {
        let config = KernelConfig::default().with_user_stack(5000);
        assert_eq!(config.validate(), Err(KernelError::InvalidArgument));
    }
}
