//! Resource limits and usage

use crate::time::Duration;

/// Limits installed on a process at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Bytes of mapped address space; `None` = unlimited
    pub max_memory: Option<usize>,
    /// CPU time before SIGXCPU; `None` = unlimited
    pub max_cpu_time: Option<Duration>,
    pub max_threads: usize,
    /// Open IPC handles
    pub max_files: usize,
    pub max_children: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory: Some(256 * 1024 * 1024),
            max_cpu_time: None,
            max_threads: 64,
            max_files: 256,
            max_children: 64,
        }
    }
}

impl ResourceLimits {
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    pub fn with_max_children(mut self, children: usize) -> Self {
        self.max_children = children;
        self
    }

    pub fn with_max_files(mut self, files: usize) -> Self {
        self.max_files = files;
        self
    }

    pub fn with_max_memory(mut self, bytes: Option<usize>) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn with_max_cpu_time(mut self, time: Option<Duration>) -> Self {
        self.max_cpu_time = time;
        self
    }
}

/// Resources a process currently consumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Mapped bytes
    pub memory: usize,
    /// Resident pages
    pub resident_pages: usize,
    pub cpu_time: Duration,
    /// Bytes moved through pipes and message queues
    pub io_bytes: u64,
    pub open_handles: usize,
}
