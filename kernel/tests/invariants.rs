//! Séquences aléatoires d'opérations : les invariants de l'ordonnanceur et
//! de la table des processus doivent tenir après chacune d'elles.

mod common;

use common::{boot, Machine};
use exo_core::process::{ExitStatus, WaitSelector};
use exo_core::sched::{CpuMask, SchedParams};
use exo_core::signal::{SignalTarget, SIGCONT, SIGKILL, SIGSTOP, SIGTERM, SIGUSR1};
use exo_core::{Duration, KernelConfig, KernelError, ThreadState, Tid, Timeout};
use proptest::prelude::*;

const ENTRY: u64 = 0x40_0000;
const MAX_PROCESSES: usize = 24;
const SIGNALS: [u32; 5] = [SIGUSR1, SIGSTOP, SIGCONT, SIGTERM, SIGKILL];

#[derive(Debug, Clone)]
enum Op {
    Spawn,
    Fork(usize),
    Exit(usize, i32),
    Reap,
    Sleep(usize, u64),
    Yield(usize),
    Tick(u8),
    Signal(usize, usize),
    Deliver(usize),
    Band(usize, u8),
    Pin(usize, u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Spawn),
        1 => any::<usize>().prop_map(Op::Fork),
        1 => (any::<usize>(), 0i32..8).prop_map(|(i, code)| Op::Exit(i, code)),
        2 => Just(Op::Reap),
        2 => (any::<usize>(), 1u64..20).prop_map(|(i, ms)| Op::Sleep(i, ms)),
        2 => any::<usize>().prop_map(Op::Yield),
        4 => (1u8..6).prop_map(Op::Tick),
        2 => (any::<usize>(), 0..SIGNALS.len()).prop_map(|(i, s)| Op::Signal(i, s)),
        2 => any::<usize>().prop_map(Op::Deliver),
        1 => (any::<usize>(), 0u8..32).prop_map(|(i, band)| Op::Band(i, band)),
        1 => (any::<usize>(), 1u64..4).prop_map(|(i, bits)| Op::Pin(i, bits)),
    ]
}

struct World {
    m: Machine,
    threads: Vec<Tid>,
}

impl World {
    fn new(cpus: usize) -> Self {
        Self { m: boot(KernelConfig::default().with_cpus(cpus)), threads: Vec::new() }
    }

    /// Live user thread for `index`, if any
    fn pick(&mut self, index: usize) -> Option<Tid> {
        let kernel = &self.m.kernel;
        self.threads.retain(|tid| kernel.thread(*tid).is_ok());
        if self.threads.is_empty() {
            return None;
        }
        Some(self.threads[index % self.threads.len()])
    }

    /// Only a thread that could be on a CPU issues calls on its own behalf
    fn pick_runnable(&mut self, index: usize) -> Option<Tid> {
        let tid = self.pick(index)?;
        let state = self.m.kernel.thread_snapshot(tid).ok()?.state;
        matches!(state, ThreadState::Ready | ThreadState::Running).then_some(tid)
    }

    fn apply(&mut self, op: &Op) {
        let init = self.m.init_pid();
        let init_tid = self.m.init_tid();
        match *op {
            Op::Spawn => {
                if self.m.kernel.process_count() < MAX_PROCESSES {
                    if let Ok((_, tid)) = self.m.kernel.process_spawn("prop", init, ENTRY, 0) {
                        self.threads.push(tid);
                    }
                }
            }
            Op::Fork(i) => {
                if self.m.kernel.process_count() >= MAX_PROCESSES {
                    return;
                }
                if let Some(tid) = self.pick_runnable(i) {
                    if let Ok(child) = self.m.kernel.fork_like(tid) {
                        let main = self.m.kernel.process(child).ok().and_then(|p| p.main_thread());
                        self.threads.extend(main);
                    }
                }
            }
            Op::Exit(i, code) => {
                if let Some(tid) = self.pick(i) {
                    let pid = self.m.kernel.thread(tid).map(|t| t.pid());
                    if let Ok(pid) = pid {
                        let _ = self.m.kernel.process_exit(pid, ExitStatus::Exited(code));
                    }
                }
            }
            Op::Reap => {
                let _ = self.m.kernel.process_wait(init_tid, WaitSelector::Any, Timeout::Poll);
            }
            Op::Sleep(i, ms) => {
                if let Some(tid) = self.pick_runnable(i) {
                    let _ = self.m.kernel.sleep(tid, Duration::from_ms(ms));
                }
            }
            Op::Yield(i) => {
                if let Some(tid) = self.pick(i) {
                    let _ = self.m.kernel.yield_now(tid);
                }
            }
            Op::Tick(n) => {
                for _ in 0..n {
                    self.m.tick();
                }
            }
            Op::Signal(i, s) => {
                if let Some(tid) = self.pick(i) {
                    if let Ok(pid) = self.m.kernel.thread(tid).map(|t| t.pid()) {
                        let _ = self.m.kernel.signal_send(init, SignalTarget::Process(pid), SIGNALS[s], None);
                    }
                }
            }
            Op::Deliver(i) => {
                if let Some(tid) = self.pick_runnable(i) {
                    let _ = self.m.kernel.handle_pending(tid);
                }
            }
            Op::Band(i, band) => {
                if let Some(tid) = self.pick(i) {
                    let _ = self.m.kernel.set_sched_params(init_tid, tid, SchedParams::normal(band));
                }
            }
            Op::Pin(i, bits) => {
                if let Some(tid) = self.pick(i) {
                    let _ = self.m.kernel.set_affinity(init_tid, tid, CpuMask::from_bits(bits));
                }
            }
        }
        self.m.settle();
    }

    /// Kill everything, reap it, and let the CPUs drop dead threads
    fn teardown(&mut self) {
        let init = self.m.init_pid();
        for tid in self.threads.clone() {
            if let Ok(pid) = self.m.kernel.thread(tid).map(|t| t.pid()) {
                let _ = self.m.kernel.signal_send(init, SignalTarget::Process(pid), SIGKILL, None);
            }
        }
        self.m.settle();
        loop {
            match self.m.kernel.process_wait(self.m.init_tid(), WaitSelector::Any, Timeout::Poll) {
                Ok(_) => continue,
                Err(KernelError::NoChild) => break,
                Err(err) => panic!("reaping failed: {:?}", err),
            }
        }
        self.m.tick();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_invariants_hold_after_every_op(cpus in 1usize..=2, ops in prop::collection::vec(op(), 1..80)) {
        let mut world = World::new(cpus);
        let processes = world.m.kernel.process_count();
        let threads = world.m.kernel.thread_count();
        let frames = world.m.kernel.frames().allocated();

        for op in &ops {
            world.apply(op);
            if let Err(violation) = world.m.kernel.check_invariants() {
                return Err(TestCaseError::fail(format!("after {:?}: {}", op, violation)));
            }
        }

        world.teardown();
        world.m.assert_invariants();
        prop_assert_eq!(world.m.kernel.process_count(), processes);
        prop_assert_eq!(world.m.kernel.thread_count(), threads);
        prop_assert_eq!(world.m.kernel.frames().allocated(), frames);
    }
}
