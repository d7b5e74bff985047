//! Rich signal payloads

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::process::Pid;

/// Origin of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SigCode {
    /// kill / tkill from a process
    User = 0,
    /// Raised by the kernel itself (SIGKILL on OOM, SIGXCPU...)
    Kernel = 1,
    /// Queued with a value
    Queue = 2,
    /// Synchronous fault (SIGSEGV, SIGBUS)
    Fault = 3,
    /// Child state change (SIGCHLD)
    Child = 4,
    /// Pipe or I/O condition
    Io = 5,
}

/// Payload carried alongside a pending signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigInfo {
    pub signo: u32,
    pub code: SigCode,
    pub sender: Option<Pid>,
    pub sender_uid: u32,
    pub fault_addr: u64,
    pub fd: i32,
    pub band: i64,
    pub value: u64,
    /// Child exit status for SIGCHLD
    pub status: i32,
}

impl SigInfo {
    fn base(signo: u32, code: SigCode) -> Self {
        Self {
            signo,
            code,
            sender: None,
            sender_uid: 0,
            fault_addr: 0,
            fd: -1,
            band: 0,
            value: 0,
            status: 0,
        }
    }

    pub fn user(signo: u32, sender: Pid, uid: u32) -> Self {
        Self { sender: Some(sender), sender_uid: uid, ..Self::base(signo, SigCode::User) }
    }

    pub fn kernel(signo: u32) -> Self {
        Self::base(signo, SigCode::Kernel)
    }

    pub fn fault(signo: u32, addr: u64) -> Self {
        Self { fault_addr: addr, ..Self::base(signo, SigCode::Fault) }
    }

    pub fn child(signo: u32, child: Pid, status: i32) -> Self {
        Self { sender: Some(child), status, ..Self::base(signo, SigCode::Child) }
    }

    pub fn io(signo: u32, fd: i32, band: i64) -> Self {
        Self { fd, band, ..Self::base(signo, SigCode::Io) }
    }

    /// Attach a queued value (turns a user signal into a queued one)
    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        if self.code == SigCode::User {
            self.code = SigCode::Queue;
        }
        self
    }

    pub fn to_raw(&self) -> RawSigInfo {
        RawSigInfo {
            signo: self.signo,
            code: self.code as u32,
            pid: self.sender.map_or(0, |pid| pid.raw()),
            uid: self.sender_uid,
            status: self.status,
            addr: self.fault_addr,
            fd: self.fd,
            _pad: 0,
            band: self.band,
            value: self.value,
        }
    }
}

/// siginfo layout handed to user handlers
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct RawSigInfo {
    pub signo: u32,
    pub code: u32,
    pub pid: u64,
    pub uid: u32,
    pub status: i32,
    pub addr: u64,
    pub fd: i32,
    pub _pad: u32,
    pub band: i64,
    pub value: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SIGCHLD, SIGSEGV, SIGUSR1};

    #[test]
    fn test_constructors() {
        let info = SigInfo::fault(SIGSEGV, 0xdead_0000);
        assert_eq!(info.code, SigCode::Fault);
        assert_eq!(info.to_raw().addr, 0xdead_0000);
        assert_eq!(info.to_raw().pid, 0);

        let pid = Pid::from_raw(3).unwrap();
        let child = SigInfo::child(SIGCHLD, pid, 42);
        assert_eq!(child.to_raw().pid, 3);
        assert_eq!(child.to_raw().status, 42);
    }

    #[test]
    fn test_value_makes_queued() {
        let pid = Pid::from_raw(1).unwrap();
        let info = SigInfo::user(SIGUSR1, pid, 1000).with_value(7);
        assert_eq!(info.code, SigCode::Queue);
        assert_eq!(info.to_raw().value, 7);
        assert_eq!(info.to_raw().uid, 1000);
    }
}
