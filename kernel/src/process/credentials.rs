//! Process credentials
//!
//! Real, effective and saved user/group ids plus a capability set. Ids
//! change only through `set_uid`, `set_euid` and `set_gid`, which follow the
//! POSIX saved-id rules.

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};

bitflags! {
    /// Privileges a process may hold independently of its uid
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Signal any process
        const KILL         = 1 << 0;
        /// Set arbitrary user ids
        const SETUID       = 1 << 1;
        /// Set arbitrary group ids
        const SETGID       = 1 << 2;
        /// Raise scheduling urgency (real-time class, negative nice)
        const SYS_NICE     = 1 << 3;
        /// Open IPC objects owned by other users
        const IPC_OWNER    = 1 << 4;
        /// Exceed resource limits
        const SYS_RESOURCE = 1 << 5;
        const SYS_ADMIN    = 1 << 6;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ruid: u32,
    pub euid: u32,
    pub suid: u32,
    pub rgid: u32,
    pub egid: u32,
    pub sgid: u32,
    /// Capabilities in effect
    pub caps: Capabilities,
    /// Capabilities the process may regain
    pub permitted: Capabilities,
}

impl Credentials {
    /// Superuser with every capability
    pub fn root() -> Self {
        Self {
            ruid: 0,
            euid: 0,
            suid: 0,
            rgid: 0,
            egid: 0,
            sgid: 0,
            caps: Capabilities::all(),
            permitted: Capabilities::all(),
        }
    }

    /// Unprivileged user
    pub fn user(uid: u32, gid: u32) -> Self {
        Self {
            ruid: uid,
            euid: uid,
            suid: uid,
            rgid: gid,
            egid: gid,
            sgid: gid,
            caps: Capabilities::empty(),
            permitted: Capabilities::empty(),
        }
    }

    pub fn has(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }

    /// Sender may signal `target`: matching uid or `KILL`
    pub fn can_signal(&self, target: &Credentials) -> bool {
        self.has(Capabilities::KILL) || self.euid == target.ruid || self.euid == target.euid
    }

    /// Drop capabilities once no user id is 0 any more
    fn fixup_caps(&mut self) {
        if self.ruid != 0 && self.euid != 0 && self.suid != 0 {
            self.caps = Capabilities::empty();
            self.permitted = Capabilities::empty();
        } else if self.euid == 0 {
            self.caps = self.permitted;
        } else {
            self.caps = Capabilities::empty();
        }
    }

    /// `setuid`: privileged callers set all three ids, others only the
    /// effective id and only to their real or saved id
    pub fn set_uid(&mut self, uid: u32) -> KernelResult<()> {
        if self.has(Capabilities::SETUID) {
            self.ruid = uid;
            self.euid = uid;
            self.suid = uid;
        } else if uid == self.ruid || uid == self.suid {
            self.euid = uid;
        } else {
            return Err(KernelError::PermissionDenied);
        }
        self.fixup_caps();
        Ok(())
    }

    /// `seteuid`: the saved id lets a process switch back and forth
    pub fn set_euid(&mut self, euid: u32) -> KernelResult<()> {
        if !self.has(Capabilities::SETUID) && euid != self.ruid && euid != self.suid {
            return Err(KernelError::PermissionDenied);
        }
        self.euid = euid;
        self.fixup_caps();
        Ok(())
    }

    pub fn set_gid(&mut self, gid: u32) -> KernelResult<()> {
        if self.has(Capabilities::SETGID) {
            self.rgid = gid;
            self.egid = gid;
            self.sgid = gid;
        } else if gid == self.rgid || gid == self.sgid {
            self.egid = gid;
        } else {
            return Err(KernelError::PermissionDenied);
        }
        Ok(())
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::root()
    }
}
