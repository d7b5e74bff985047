//! Tests d'intégration du cycle de vie des processus et threads

mod common;

use std::sync::Arc;

use common::{boot, boot_default, done};
use exo_core::memory::{BackingStore, MemoryFile, Protection};
use exo_core::process::{ExecImage, ExecSegment, ExitStatus, ProcessState, ResourceLimits, WaitSelector};
use exo_core::signal::{Disposition, Handler, SaFlags, SigSet, SIGUSR1, SIGUSR2};
use exo_core::{Duration, KernelConfig, KernelError, ThreadState, Timeout};

const ENTRY: u64 = 0x40_0000;

#[test]
fn test_boot_layout() {
    let m = boot(KernelConfig::default().with_cpus(2));
    let init = m.kernel.process(m.init_pid()).unwrap();
    assert_eq!(init.name(), "init");
    assert_eq!(init.ppid(), None);
    assert_eq!(init.state(), ProcessState::Running);
    assert_eq!(init.threads().len(), 1);
    // init plus the kernel process; one idle thread per CPU plus init's
    assert_eq!(m.kernel.process_count(), 2);
    assert_eq!(m.kernel.thread_count(), 3);
    assert!(m.kernel.process(m.kernel.kernel_pid()).unwrap().is_kernel());
    m.assert_invariants();
}

#[test]
fn test_thread_limit() {
    let limits = ResourceLimits::default().with_max_threads(2);
    let m = boot(KernelConfig::default().with_limits(limits));
    let (pid, _) = m.kernel.process_spawn("worker", m.init_pid(), ENTRY, 0).unwrap();
    let second = m.kernel.thread_create(pid, ENTRY, 1, 0).unwrap();
    assert_eq!(m.kernel.thread_snapshot(second).unwrap().state, ThreadState::New);
    assert_eq!(m.kernel.thread_create(pid, ENTRY, 2, 0), Err(KernelError::LimitExceeded));
    assert_eq!(m.kernel.process(pid).unwrap().threads().len(), 2);
}

#[test]
fn test_child_limit() {
    let limits = ResourceLimits::default().with_max_children(2);
    let m = boot(KernelConfig::default().with_limits(limits));
    m.kernel.process_spawn("a", m.init_pid(), ENTRY, 0).unwrap();
    m.kernel.process_spawn("b", m.init_pid(), ENTRY, 0).unwrap();
    let before = m.kernel.process_count();
    assert_eq!(m.kernel.process_spawn("c", m.init_pid(), ENTRY, 0), Err(KernelError::LimitExceeded));
    assert_eq!(m.kernel.process_count(), before);
}

#[test]
fn test_kernel_process_is_protected() {
    let m = boot_default();
    let kernel = m.kernel.kernel_pid();
    assert_eq!(m.kernel.process_create("x", kernel), Err(KernelError::PermissionDenied));
    assert_eq!(m.kernel.thread_create(kernel, ENTRY, 0, 0), Err(KernelError::PermissionDenied));
    assert_eq!(m.kernel.process_exit(kernel, ExitStatus::Exited(1)), Err(KernelError::PermissionDenied));

    let idle = m.kernel.scheduler_snapshot(0).unwrap().idle.unwrap();
    assert_eq!(m.kernel.thread_exit(idle, 0), Err(KernelError::PermissionDenied));
}

#[test]
fn test_embryo_has_no_threads() {
    let m = boot_default();
    let pid = m.kernel.process_create("embryo", m.init_pid()).unwrap();
    let process = m.kernel.process(pid).unwrap();
    assert_eq!(process.state(), ProcessState::Embryo);
    assert!(process.threads().is_empty());
    m.assert_invariants();

    let tid = m.kernel.thread_create(pid, ENTRY, 0, 0).unwrap();
    assert_eq!(process.main_thread(), Some(tid));
    m.kernel.start_thread(tid).unwrap();
    assert_eq!(process.state(), ProcessState::Running);
    assert_eq!(m.kernel.start_thread(tid), Err(KernelError::InvalidArgument));
}

#[test]
fn test_last_thread_exit_makes_zombie() {
    let m = boot_default();
    let (pid, main) = m.kernel.process_spawn("two", m.init_pid(), ENTRY, 0).unwrap();
    let second = m.kernel.thread_create(pid, ENTRY, 1, 0).unwrap();
    m.kernel.start_thread(second).unwrap();

    m.kernel.thread_exit(second, 5).unwrap();
    assert_eq!(m.kernel.process(pid).unwrap().state(), ProcessState::Running);
    assert_eq!(m.kernel.thread(second).err(), Some(KernelError::NoSuchThread));

    m.kernel.thread_exit(main, 7).unwrap();
    let process = m.kernel.process(pid).unwrap();
    assert_eq!(process.state(), ProcessState::Zombie);
    assert_eq!(process.exit_status(), Some(ExitStatus::Exited(7)));
    m.assert_invariants();
}

#[test]
fn test_first_exit_status_wins() {
    let m = boot_default();
    let (pid, _) = m.kernel.process_spawn("twice", m.init_pid(), ENTRY, 0).unwrap();
    m.kernel.process_exit(pid, ExitStatus::Exited(3)).unwrap();
    m.kernel.process_exit(pid, ExitStatus::Exited(9)).unwrap();
    assert_eq!(m.kernel.process(pid).unwrap().exit_status(), Some(ExitStatus::Exited(3)));
}

#[test]
fn test_orphans_go_to_init() {
    let m = boot_default();
    let (parent, _) = m.kernel.process_spawn("parent", m.init_pid(), ENTRY, 0).unwrap();
    let (orphan, _) = m.kernel.process_spawn("orphan", parent, ENTRY, 0).unwrap();

    m.kernel.process_exit(parent, ExitStatus::Exited(0)).unwrap();
    let orphan_process = m.kernel.process(orphan).unwrap();
    assert_eq!(orphan_process.ppid(), Some(m.init_pid()));
    assert!(m.kernel.process(m.init_pid()).unwrap().children().contains(&orphan));

    let first = done(m.kernel.process_wait(m.init_tid(), WaitSelector::Pid(parent), Timeout::Poll).unwrap());
    assert_eq!(first.pid, parent);

    m.kernel.process_exit(orphan, ExitStatus::Exited(4)).unwrap();
    let second = done(m.kernel.process_wait(m.init_tid(), WaitSelector::Any, Timeout::Poll).unwrap());
    assert_eq!(second.pid, orphan);
    assert_eq!(second.status.code(), 4);
    m.assert_invariants();
}

#[test]
fn test_wait_selectors() {
    let m = boot_default();
    let (a, _) = m.kernel.process_spawn("a", m.init_pid(), ENTRY, 0).unwrap();
    let (b, _) = m.kernel.process_spawn("b", m.init_pid(), ENTRY, 0).unwrap();
    m.kernel.set_pgid(m.init_pid(), b, None).unwrap();

    // Nothing has exited yet
    let init = m.init_tid();
    assert_eq!(m.kernel.process_wait(init, WaitSelector::Any, Timeout::Poll), Err(KernelError::WouldBlock));

    m.kernel.process_exit(a, ExitStatus::Exited(1)).unwrap();
    m.kernel.process_exit(b, ExitStatus::Exited(2)).unwrap();
    let by_group = done(m.kernel.process_wait(init, WaitSelector::Group(b), Timeout::Poll).unwrap());
    assert_eq!(by_group.pid, b);
    assert_eq!(m.kernel.process_wait(init, WaitSelector::Group(b), Timeout::Poll), Err(KernelError::NoChild));
    let by_pid = done(m.kernel.process_wait(init, WaitSelector::Pid(a), Timeout::Poll).unwrap());
    assert_eq!(by_pid.status, ExitStatus::Exited(1));
}

#[test]
fn test_wait_without_children() {
    let m = boot_default();
    let (_, tid) = m.kernel.process_spawn("lonely", m.init_pid(), ENTRY, 0).unwrap();
    assert_eq!(m.kernel.process_wait(tid, WaitSelector::Any, Timeout::Never), Err(KernelError::NoChild));
}

#[test]
fn test_wait_times_out() {
    let m = boot_default();
    m.kernel.process_spawn("slow", m.init_pid(), ENTRY, 0).unwrap();
    let init = m.init_tid();
    let timeout = Timeout::After(Duration::from_ms(5));
    assert!(m.kernel.process_wait(init, WaitSelector::Any, timeout).unwrap().is_blocked());
    assert_eq!(m.kernel.armed_timers(), 1);

    m.run_for(Duration::from_ms(5));
    assert_ne!(m.kernel.thread_snapshot(init).unwrap().state, ThreadState::Waiting);
    assert_eq!(m.kernel.process_wait(init, WaitSelector::Any, timeout), Err(KernelError::Timeout));
    assert_eq!(m.kernel.armed_timers(), 0);
    m.assert_invariants();
}

#[test]
fn test_fork_duplicates_caller() {
    let m = boot_default();
    let (parent, main) = m.kernel.process_spawn("forker", m.init_pid(), ENTRY, 0).unwrap();
    let extra = m.kernel.thread_create(parent, ENTRY, 1, 0).unwrap();
    m.kernel.start_thread(extra).unwrap();
    m.kernel.sigaction(parent, SIGUSR2, Some(Disposition::Ignore)).unwrap();

    let child = m.kernel.fork_like(main).unwrap();
    let child_process = m.kernel.process(child).unwrap();
    assert_eq!(child_process.ppid(), Some(parent));
    assert_eq!(child_process.name(), "forker");
    assert_eq!(child_process.pgid(), m.kernel.process(parent).unwrap().pgid());
    assert_eq!(child_process.threads().len(), 1);
    assert_eq!(m.kernel.sigaction(child, SIGUSR2, None).unwrap(), Disposition::Ignore);

    let child_thread = m.kernel.thread(child_process.main_thread().unwrap()).unwrap();
    assert_eq!(child_thread.context().return_value(), 0);
    assert_eq!(child_thread.context().instruction_pointer(), ENTRY);
    assert_eq!(child_thread.state(), ThreadState::Ready);
    m.assert_invariants();
}

#[test]
fn test_exec_replaces_image() {
    let m = boot_default();
    let (pid, main) = m.kernel.process_spawn("shell", m.init_pid(), ENTRY, 0).unwrap();
    let helper = m.kernel.thread_create(pid, ENTRY, 1, 0).unwrap();
    m.kernel.start_thread(helper).unwrap();
    let handler = Handler { entry: 0x40_8000, mask: SigSet::empty(), flags: SaFlags::empty(), restorer: 0 };
    m.kernel.sigaction(pid, SIGUSR1, Some(Disposition::Custom(handler))).unwrap();
    m.kernel.sigaction(pid, SIGUSR2, Some(Disposition::Ignore)).unwrap();
    let scratch = m.kernel.mmap(pid, None, 4096, Protection::RW).unwrap();

    let code = b"\x90\x90\xc3".to_vec();
    let file: Arc<dyn BackingStore> = Arc::new(MemoryFile::new("prog", code));
    let image = ExecImage {
        name: "prog".to_string(),
        argv: vec!["prog".to_string(), "-v".to_string()],
        entry: 0x80_0000,
        segments: vec![
            ExecSegment { vaddr: 0x80_0000, mem_size: 4096, prot: Protection::RX, file: Some((file, 0)) },
            ExecSegment { vaddr: 0x90_0000, mem_size: 100, prot: Protection::RW, file: None },
        ],
        stack_size: 0,
    };
    m.kernel.process_exec(main, image).unwrap();

    let process = m.kernel.process(pid).unwrap();
    assert_eq!(process.name(), "prog");
    assert_eq!(process.cmdline(), vec!["prog".to_string(), "-v".to_string()]);
    assert_eq!(process.threads(), vec![main]);
    assert!(m.kernel.thread(helper).is_err());
    assert_eq!(m.kernel.thread(main).unwrap().context().instruction_pointer(), 0x80_0000);
    assert_eq!(m.kernel.sigaction(pid, SIGUSR1, None).unwrap(), Disposition::Default);
    assert_eq!(m.kernel.sigaction(pid, SIGUSR2, None).unwrap(), Disposition::Ignore);

    assert_eq!(m.kernel.copy_from_user(&process, 0x80_0000, 3).unwrap(), vec![0x90, 0x90, 0xc3]);
    assert_eq!(m.kernel.copy_to_user(&process, 0x80_0000, &[0]), Err(KernelError::BadAddress));
    assert_eq!(m.kernel.copy_from_user(&process, 0x90_0000, 4).unwrap(), vec![0; 4]);
    assert_eq!(m.kernel.copy_from_user(&process, scratch, 1), Err(KernelError::BadAddress));
    m.assert_invariants();
}

#[test]
fn test_failed_exec_keeps_old_image() {
    let m = boot_default();
    let (pid, main) = m.kernel.process_spawn("keeper", m.init_pid(), ENTRY, 0).unwrap();
    let file: Arc<dyn BackingStore> = Arc::new(MemoryFile::new("bad", vec![1, 2, 3]));
    let image = ExecImage {
        name: "bad".to_string(),
        argv: Vec::new(),
        entry: 0x80_0010,
        // File-backed segments must start on a page boundary
        segments: vec![ExecSegment { vaddr: 0x80_0010, mem_size: 16, prot: Protection::RX, file: Some((file, 0)) }],
        stack_size: 0,
    };
    assert_eq!(m.kernel.process_exec(main, image), Err(KernelError::InvalidArgument));
    let process = m.kernel.process(pid).unwrap();
    assert_eq!(process.name(), "keeper");
    assert_eq!(m.kernel.thread(main).unwrap().context().instruction_pointer(), ENTRY);
}

#[test]
fn test_exec_rejects_wrapping_segment() {
    let m = boot_default();
    let (pid, main) = m.kernel.process_spawn("wrap", m.init_pid(), ENTRY, 0).unwrap();
    let image = ExecImage {
        name: "wrap".to_string(),
        argv: Vec::new(),
        entry: 0x80_0000,
        segments: vec![ExecSegment { vaddr: u64::MAX - 0xfff, mem_size: 0x2000, prot: Protection::RW, file: None }],
        stack_size: 0,
    };
    assert_eq!(m.kernel.process_exec(main, image), Err(KernelError::InvalidArgument));
    assert_eq!(m.kernel.process(pid).unwrap().name(), "wrap");
    m.assert_invariants();
}

#[test]
fn test_credentials() {
    let m = boot_default();
    let (pid, _) = m.kernel.process_spawn("login", m.init_pid(), ENTRY, 0).unwrap();
    m.kernel.set_gid(pid, 100).unwrap();
    m.kernel.set_uid(pid, 1000).unwrap();
    let creds = m.kernel.process(pid).unwrap().credentials();
    assert_eq!((creds.ruid, creds.euid, creds.suid), (1000, 1000, 1000));
    assert_eq!(creds.egid, 100);
    assert!(creds.caps.is_empty());

    assert_eq!(m.kernel.set_uid(pid, 0), Err(KernelError::PermissionDenied));
    assert_eq!(m.kernel.set_euid(pid, 0), Err(KernelError::PermissionDenied));
    assert_eq!(m.kernel.set_gid(pid, 0), Err(KernelError::PermissionDenied));

    // Unprivileged children inherit the parent's credentials
    let child = m.kernel.process_create("sub", pid).unwrap();
    assert_eq!(m.kernel.process(child).unwrap().credentials().euid, 1000);
}

#[test]
fn test_process_stats() {
    let m = boot_default();
    let (pid, tid) = m.kernel.process_spawn("stats", m.init_pid(), ENTRY, 0).unwrap();
    let addr = m.kernel.mmap(pid, None, 3 * 4096, Protection::RW).unwrap();
    let process = m.kernel.process(pid).unwrap();
    m.kernel.copy_to_user(&process, addr, &[1]).unwrap();
    m.kernel.copy_to_user(&process, addr + 4096, &[1]).unwrap();
    m.kernel.mq_create(pid, None, 0, 0).unwrap();
    m.kernel.yield_now(tid).unwrap();

    let stats = m.kernel.process_stats(pid).unwrap();
    assert_eq!(stats.name, "stats");
    assert_eq!(stats.ppid, Some(m.init_pid()));
    assert_eq!(stats.threads, 1);
    assert_eq!(stats.resident_pages, 2);
    assert!(stats.page_faults >= 2);
    assert!(stats.memory >= 3 * 4096);
    assert_eq!(stats.open_handles, 1);
    assert_eq!(stats.exit_code, None);

    let list = m.kernel.process_list();
    assert!(list.iter().all(|entry| entry.pid != m.kernel.kernel_pid()));
    assert!(list.windows(2).all(|pair| pair[0].pid < pair[1].pid));
    assert_eq!(list.len(), 2);
}

#[test]
fn test_process_cpu_time_sums_threads() {
    let m = boot_default();
    let (pid, first) = m.kernel.process_spawn("busy", m.init_pid(), ENTRY, 0).unwrap();
    let second = m.kernel.thread_create(pid, ENTRY, 1, 0).unwrap();
    m.kernel.start_thread(second).unwrap();
    m.park_init();

    m.run_for(Duration::from_ms(40));
    let a = m.kernel.thread_snapshot(first).unwrap().cpu_time;
    let b = m.kernel.thread_snapshot(second).unwrap().cpu_time;
    assert_eq!(a.as_ms(), 20);
    assert_eq!(b.as_ms(), 20);
    assert_eq!(m.kernel.process(pid).unwrap().cpu_time().as_ms(), 40);
    assert!(m.kernel.process_stats(pid).unwrap().involuntary_switches >= 3);
}
