//! Process statistics query

use alloc::string::String;
use alloc::vec::Vec;

use super::{Pid, ProcessState};
use crate::error::KernelResult;
use crate::kernel::Kernel;
use crate::time::Duration;

/// Read-only view of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStats {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub pgid: Pid,
    pub name: String,
    pub state: ProcessState,
    pub threads: usize,
    /// Mapped bytes
    pub memory: usize,
    pub resident_pages: usize,
    pub cpu_time: Duration,
    pub page_faults: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub open_handles: usize,
    pub exit_code: Option<i32>,
}

impl ProcessStats {
    pub fn context_switches(&self) -> u64 {
        self.voluntary_switches + self.involuntary_switches
    }
}

impl Kernel {
    pub fn process_stats(&self, pid: Pid) -> KernelResult<ProcessStats> {
        let process = self.process(pid)?;
        let usage = process.usage();
        let page_faults = process.space.lock().stats().page_faults;
        let (mut stats, threads) = {
            let inner = process.inner.lock();
            let stats = ProcessStats {
                pid,
                ppid: inner.ppid,
                pgid: inner.pgid,
                name: inner.name.clone(),
                state: inner.state,
                threads: inner.threads.len(),
                memory: usage.memory,
                resident_pages: usage.resident_pages,
                cpu_time: usage.cpu_time,
                page_faults,
                voluntary_switches: inner.retired_voluntary,
                involuntary_switches: inner.retired_involuntary,
                open_handles: usage.open_handles,
                exit_code: inner.exit.map(|status| status.code()),
            };
            (stats, inner.threads.clone())
        };
        for tid in threads {
            if let Ok(thread) = self.thread(tid) {
                let sched = thread.sched.lock();
                stats.voluntary_switches += sched.voluntary_switches;
                stats.involuntary_switches += sched.involuntary_switches;
            }
        }
        Ok(stats)
    }

    /// Every user process, in id order
    pub fn process_list(&self) -> Vec<ProcessStats> {
        let kernel = self.kernel_pid();
        let pids: Vec<Pid> = self
            .processes
            .read()
            .iter()
            .map(|(_, process)| process.id())
            .filter(|pid| *pid != kernel)
            .collect();
        let mut list: Vec<ProcessStats> = pids.into_iter().filter_map(|pid| self.process_stats(pid).ok()).collect();
        list.sort_by_key(|stats| stats.pid);
        list
    }
}
