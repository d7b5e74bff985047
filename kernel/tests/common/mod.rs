//! Harnais commun des tests d'intégration
//!
//! Démarre un coeur complet sur `HostedPlatform` et fait avancer le temps
//! virtuel tick par tick.

#![allow(dead_code)]

use std::sync::Arc;

use exo_core::arch::hosted::HostedPlatform;
use exo_core::memory::{MemorySwap, SwapDevice};
use exo_core::process::WaitSelector;
use exo_core::{Duration, Kernel, KernelConfig, Pid, Progress, Tid, Timeout};

pub struct Machine {
    pub kernel: Kernel,
    pub platform: Arc<HostedPlatform>,
}

pub fn boot(config: KernelConfig) -> Machine {
    boot_with_swap(config, None)
}

pub fn boot_with_swap(config: KernelConfig, swap: Option<Arc<dyn SwapDevice>>) -> Machine {
    let platform = Arc::new(HostedPlatform::new(config.cpu_count));
    let kernel = Kernel::boot(config, platform.clone(), swap).expect("boot");
    for cpu in 0..kernel.cpu_count() {
        platform.set_current_cpu(cpu);
        kernel.start_cpu(cpu).expect("start cpu");
    }
    platform.set_current_cpu(0);
    Machine { kernel, platform }
}

pub fn boot_default() -> Machine {
    boot(KernelConfig::default())
}

pub fn swap(pages: usize) -> Option<Arc<dyn SwapDevice>> {
    Some(Arc::new(MemorySwap::new(pages)))
}

impl Machine {
    pub fn init_pid(&self) -> Pid {
        self.kernel.init_pid()
    }

    pub fn init_tid(&self) -> Tid {
        self.kernel.process(self.init_pid()).unwrap().main_thread().unwrap()
    }

    /// One timer interrupt on every CPU, after draining pending IPIs
    pub fn tick(&self) {
        self.platform.advance(self.kernel.config().tick_period);
        for cpu in 0..self.kernel.cpu_count() {
            self.platform.set_current_cpu(cpu);
            self.kernel.scheduler_tick(cpu).unwrap();
        }
        self.platform.set_current_cpu(0);
        self.settle();
    }

    pub fn run_for(&self, duration: Duration) {
        let ticks = duration.as_ns() / self.kernel.config().tick_period.as_ns();
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Deliver every IPI sent so far
    pub fn settle(&self) {
        loop {
            let ipis = self.platform.take_ipis();
            if ipis.is_empty() {
                break;
            }
            for (cpu, vector) in ipis {
                self.platform.set_current_cpu(cpu);
                self.kernel.handle_ipi(cpu, vector).unwrap();
            }
        }
        self.platform.set_current_cpu(0);
    }

    /// Park init on its children so it stops competing for CPU 0
    ///
    /// Init needs at least one child.
    pub fn park_init(&self) {
        let blocked = self.kernel.process_wait(self.init_tid(), WaitSelector::Any, Timeout::Never).unwrap();
        assert!(blocked.is_blocked());
    }

    pub fn current(&self, cpu: usize) -> Option<Tid> {
        self.kernel.current_thread(cpu)
    }

    pub fn assert_invariants(&self) {
        if let Err(violation) = self.kernel.check_invariants() {
            panic!("invariant violated: {}", violation);
        }
    }
}

/// Unwrap a completed operation
pub fn done<T: std::fmt::Debug>(progress: Progress<T>) -> T {
    match progress {
        Progress::Done(value) => value,
        Progress::Blocked => panic!("operation blocked"),
    }
}
