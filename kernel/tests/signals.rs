//! Tests d'intégration des signaux

mod common;

use common::{boot_default, done, Machine};
use exo_core::memory::AccessKind;
use exo_core::process::{ExitStatus, ProcessState};
use exo_core::signal::{
    Disposition, Handler, MaskHow, SaFlags, SigSet, SignalDelivery, SignalTarget, SIGCHLD, SIGCONT, SIGKILL,
    SIGSEGV, SIGSTOP, SIGTERM, SIGUSR1,
};
use exo_core::{Duration, KernelError, Pid, ThreadState, Tid};

const ENTRY: u64 = 0x40_0000;
const HANDLER: u64 = 0x40_8000;
const RESTORER: u64 = 0x40_9000;

fn handler() -> Disposition {
    Disposition::Custom(Handler {
        entry: HANDLER,
        mask: SigSet::empty(),
        flags: SaFlags::empty(),
        restorer: RESTORER,
    })
}

fn spawn(m: &Machine, name: &str) -> (Pid, Tid) {
    m.kernel.process_spawn(name, m.init_pid(), ENTRY, 0).unwrap()
}

#[test]
fn test_repeated_signal_coalesces() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "target");
    m.kernel.sigaction(pid, SIGUSR1, Some(handler())).unwrap();
    m.kernel.sigprocmask(tid, MaskHow::Block, Some(SigSet::of(SIGUSR1))).unwrap();

    for _ in 0..3 {
        m.kernel.signal_to_thread(tid, SIGUSR1, None).unwrap();
    }
    assert_eq!(m.kernel.sigpending(tid).unwrap(), SigSet::of(SIGUSR1));
    assert_eq!(m.kernel.handle_pending(tid).unwrap(), SignalDelivery::Nothing);

    m.kernel.sigprocmask(tid, MaskHow::Unblock, Some(SigSet::of(SIGUSR1))).unwrap();
    assert_eq!(m.kernel.handle_pending(tid).unwrap(), SignalDelivery::HandlerInvoked(SIGUSR1));
    assert!(m.kernel.sigpending(tid).unwrap().is_empty());
}

#[test]
fn test_sent_signal_coalesces_past_queue_bound() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "storm");
    m.kernel.sigaction(pid, SIGUSR1, Some(handler())).unwrap();
    m.kernel.sigprocmask(tid, MaskHow::Block, Some(SigSet::of(SIGUSR1))).unwrap();

    // Every send carries a payload; none of them may fail or stack up
    for value in 0..100 {
        m.kernel.signal_send(m.init_pid(), SignalTarget::Process(pid), SIGUSR1, Some(value)).unwrap();
    }
    assert_eq!(m.kernel.sigpending(tid).unwrap(), SigSet::of(SIGUSR1));

    m.kernel.sigprocmask(tid, MaskHow::Unblock, Some(SigSet::of(SIGUSR1))).unwrap();
    assert_eq!(m.kernel.handle_pending(tid).unwrap(), SignalDelivery::HandlerInvoked(SIGUSR1));
    assert!(m.kernel.sigpending(tid).unwrap().is_empty());
}

#[test]
fn test_signal_lands_on_survivor_after_main_exits() {
    let m = boot_default();
    let (pid, main) = spawn(&m, "survivor");
    let helper = m.kernel.thread_create(pid, ENTRY, 1, 0).unwrap();
    m.kernel.start_thread(helper).unwrap();
    m.kernel.sigprocmask(helper, MaskHow::Block, Some(SigSet::of(SIGUSR1))).unwrap();

    m.kernel.thread_exit(main, 0).unwrap();
    m.settle();
    assert_eq!(m.kernel.process(pid).unwrap().main_thread(), Some(helper));

    m.kernel.signal_to_process(pid, SIGUSR1, None).unwrap();
    assert_eq!(m.kernel.sigpending(helper).unwrap(), SigSet::of(SIGUSR1));
    m.kernel.signal_send(m.init_pid(), SignalTarget::Process(pid), SIGUSR1, Some(3)).unwrap();
    assert_eq!(m.kernel.sigpending(helper).unwrap(), SigSet::of(SIGUSR1));
    m.assert_invariants();
}

#[test]
fn test_handler_runs_to_completion() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "handler");
    m.kernel.sigaction(pid, SIGUSR1, Some(handler())).unwrap();

    m.kernel.signal_to_process(pid, SIGUSR1, None).unwrap();
    assert_eq!(m.kernel.handle_pending(tid).unwrap(), SignalDelivery::HandlerInvoked(SIGUSR1));
    let thread = m.kernel.thread(tid).unwrap();
    assert_eq!(thread.context().instruction_pointer(), HANDLER);

    // Same signal while the handler runs stays pending
    m.kernel.signal_to_process(pid, SIGUSR1, None).unwrap();
    assert_eq!(m.kernel.handle_pending(tid).unwrap(), SignalDelivery::Nothing);
    assert!(m.kernel.sigpending(tid).unwrap().contains(SIGUSR1));

    m.kernel.signal_return(tid).unwrap();
    assert_eq!(thread.context().instruction_pointer(), ENTRY);
    assert!(m.kernel.sigprocmask(tid, MaskHow::Block, None).unwrap().is_empty());
    assert_eq!(m.kernel.handle_pending(tid).unwrap(), SignalDelivery::HandlerInvoked(SIGUSR1));
}

#[test]
fn test_signal_return_without_frame() {
    let m = boot_default();
    let (_, tid) = spawn(&m, "no-frame");
    assert_eq!(m.kernel.signal_return(tid), Err(KernelError::InvalidArgument));
}

#[test]
fn test_kill_cannot_be_caught_or_blocked() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "victim");
    assert_eq!(m.kernel.sigaction(pid, SIGKILL, Some(Disposition::Ignore)), Err(KernelError::InvalidSignal));
    assert_eq!(m.kernel.sigaction(pid, SIGSTOP, Some(handler())), Err(KernelError::InvalidSignal));

    m.kernel.sigprocmask(tid, MaskHow::SetMask, Some(SigSet::from_bits(u64::MAX))).unwrap();
    let blocked = m.kernel.sigprocmask(tid, MaskHow::Block, None).unwrap();
    assert!(!blocked.contains(SIGKILL));
    assert!(!blocked.contains(SIGSTOP));

    m.kernel.signal_send(m.init_pid(), SignalTarget::Process(pid), SIGKILL, None).unwrap();
    let process = m.kernel.process(pid).unwrap();
    assert_eq!(process.exit_status(), Some(ExitStatus::Signaled { signal: SIGKILL, core: false }));
    assert_eq!(process.state(), ProcessState::Zombie);
    assert!(m.kernel.thread(tid).is_err());
    m.assert_invariants();
}

#[test]
fn test_ignore_discards_pending() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "ignorer");
    m.kernel.sigprocmask(tid, MaskHow::Block, Some(SigSet::of(SIGUSR1))).unwrap();
    m.kernel.signal_to_process(pid, SIGUSR1, None).unwrap();
    assert!(m.kernel.sigpending(tid).unwrap().contains(SIGUSR1));

    let old = m.kernel.sigaction(pid, SIGUSR1, Some(Disposition::Ignore)).unwrap();
    assert_eq!(old, Disposition::Default);
    assert!(m.kernel.sigpending(tid).unwrap().is_empty());

    // Ignored signals are dropped at send time
    m.kernel.signal_to_process(pid, SIGUSR1, None).unwrap();
    assert!(m.kernel.sigpending(tid).unwrap().is_empty());
}

#[test]
fn test_stop_and_continue() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "stoppable");

    m.kernel.signal_send(m.init_pid(), SignalTarget::Process(pid), SIGSTOP, None).unwrap();
    assert_eq!(m.kernel.process(pid).unwrap().state(), ProcessState::Stopped);
    assert_eq!(m.kernel.thread_snapshot(tid).unwrap().state, ThreadState::Suspended);
    m.assert_invariants();

    m.kernel.signal_send(m.init_pid(), SignalTarget::Process(pid), SIGCONT, None).unwrap();
    assert_eq!(m.kernel.process(pid).unwrap().state(), ProcessState::Running);
    assert_eq!(m.kernel.thread_snapshot(tid).unwrap().state, ThreadState::Ready);
    m.assert_invariants();
}

#[test]
fn test_stopped_thread_does_not_run() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "stopped");
    m.park_init();
    assert_eq!(m.current(0), Some(tid));

    m.kernel.signal_to_process(pid, SIGSTOP, None).unwrap();
    assert_eq!(m.current(0), m.kernel.scheduler_snapshot(0).unwrap().idle);
    m.run_for(Duration::from_ms(20));
    assert_eq!(m.kernel.thread_snapshot(tid).unwrap().state, ThreadState::Suspended);

    m.kernel.signal_to_process(pid, SIGCONT, None).unwrap();
    m.tick();
    assert_eq!(m.current(0), Some(tid));
}

#[test]
fn test_unprivileged_sender_is_refused() {
    let m = boot_default();
    let (user, _) = spawn(&m, "user");
    let (other, other_tid) = spawn(&m, "other");
    m.kernel.set_uid(user, 1000).unwrap();

    let denied = m.kernel.signal_send(user, SignalTarget::Process(m.init_pid()), SIGTERM, None);
    assert_eq!(denied, Err(KernelError::PermissionDenied));
    assert_eq!(
        m.kernel.signal_send(user, SignalTarget::Process(other), 0, None),
        Err(KernelError::PermissionDenied)
    );

    // Same uid may signal
    m.kernel.set_uid(other, 1000).unwrap();
    m.kernel.signal_send(user, SignalTarget::Process(other), 0, None).unwrap();
    assert!(m.kernel.sigpending(other_tid).unwrap().is_empty());
    m.kernel.signal_send(user, SignalTarget::Process(other), SIGUSR1, Some(7)).unwrap();
    assert!(m.kernel.sigpending(other_tid).unwrap().contains(SIGUSR1));
}

#[test]
fn test_invalid_signal_numbers() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "target");
    assert_eq!(
        m.kernel.signal_send(m.init_pid(), SignalTarget::Process(pid), 99, None),
        Err(KernelError::InvalidSignal)
    );
    assert_eq!(m.kernel.signal_to_thread(tid, 0, None), Err(KernelError::InvalidSignal));
}

#[test]
fn test_group_signal() {
    let m = boot_default();
    let (leader, leader_tid) = spawn(&m, "leader");
    let (member, member_tid) = spawn(&m, "member");
    let (_, outsider_tid) = spawn(&m, "outsider");
    m.kernel.set_pgid(m.init_pid(), leader, None).unwrap();
    m.kernel.set_pgid(m.init_pid(), member, Some(leader)).unwrap();

    m.kernel.signal_send(m.init_pid(), SignalTarget::Group(leader), SIGUSR1, None).unwrap();
    assert!(m.kernel.sigpending(leader_tid).unwrap().contains(SIGUSR1));
    assert!(m.kernel.sigpending(member_tid).unwrap().contains(SIGUSR1));
    assert!(m.kernel.sigpending(outsider_tid).unwrap().is_empty());

    // Only the caller itself or its children
    assert_eq!(m.kernel.set_pgid(leader, member, None), Err(KernelError::PermissionDenied));
}

#[test]
fn test_signal_interrupts_sleep() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "sleeper");
    assert!(m.kernel.sleep(tid, Duration::from_ms(100)).unwrap().is_blocked());
    assert_eq!(m.kernel.thread_snapshot(tid).unwrap().state, ThreadState::Blocked);
    assert_eq!(m.kernel.armed_timers(), 1);

    m.kernel.signal_to_process(pid, SIGUSR1, None).unwrap();
    assert_eq!(m.kernel.thread_snapshot(tid).unwrap().state, ThreadState::Ready);
    assert_eq!(m.kernel.armed_timers(), 0);
    assert_eq!(m.kernel.sleep(tid, Duration::from_ms(100)), Err(KernelError::Interrupted));
}

#[test]
fn test_segfault_becomes_sigsegv() {
    let m = boot_default();
    let (pid, tid) = spawn(&m, "faulty");
    m.kernel.handle_page_fault(tid, 0x10, AccessKind::Read).unwrap();
    assert!(m.kernel.sigpending(tid).unwrap().contains(SIGSEGV));

    assert_eq!(m.kernel.handle_pending(tid).unwrap(), SignalDelivery::Terminated);
    let status = m.kernel.process(pid).unwrap().exit_status();
    assert_eq!(status, Some(ExitStatus::Signaled { signal: SIGSEGV, core: true }));
}

#[test]
fn test_child_exit_does_not_leave_sigchld_pending() {
    let m = boot_default();
    let (child, _) = spawn(&m, "child");
    m.kernel.process_exit(child, ExitStatus::Exited(0)).unwrap();
    assert!(!m.kernel.sigpending(m.init_tid()).unwrap().contains(SIGCHLD));

    let info = done(m.kernel.process_wait(m.init_tid(), exo_core::process::WaitSelector::Any, exo_core::Timeout::Poll).unwrap());
    assert_eq!(info.pid, child);
}
