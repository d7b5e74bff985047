//! Signal dispositions
//!
//! Per-process handler table and the static default-action table.

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use super::types::*;
use crate::error::{KernelError, KernelResult};

bitflags! {
    /// sigaction flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SaFlags: u32 {
        const NOCLDSTOP = 0x0000_0001;
        const SIGINFO   = 0x0000_0004;
        const ONSTACK   = 0x0800_0000;
        const RESTART   = 0x1000_0000;
        const NODEFER   = 0x4000_0000;
        const RESETHAND = 0x8000_0000;
    }
}

/// User handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub entry: u64,
    /// Extra signals blocked while the handler runs
    pub mask: SigSet,
    pub flags: SaFlags,
    /// Trampoline the handler returns into (issues sigreturn)
    pub restorer: u64,
}

/// What happens when a signal is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Default,
    Ignore,
    Custom(Handler),
}

/// Built-in behaviour of the Default disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    TerminateWithCore,
    Stop,
    Continue,
    Ignore,
}

/// Static default-action table
pub fn default_action(sig: u32) -> DefaultAction {
    match sig {
        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGFPE | SIGSEGV | SIGSYS | SIGXCPU | SIGXFSZ => {
            DefaultAction::TerminateWithCore
        }
        SIGCHLD | SIGURG | SIGWINCH => DefaultAction::Ignore,
        SIGCONT => DefaultAction::Continue,
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => DefaultAction::Stop,
        _ => DefaultAction::Terminate,
    }
}

pub fn is_stop_signal(sig: u32) -> bool {
    default_action(sig) == DefaultAction::Stop
}

/// Per-process handler table, indexed by signal number
#[derive(Clone)]
pub struct SignalTable {
    actions: [Disposition; MAX_SIGNALS as usize],
}

impl SignalTable {
    pub fn new() -> Self {
        Self { actions: [Disposition::Default; MAX_SIGNALS as usize] }
    }

    pub fn get(&self, sig: u32) -> KernelResult<Disposition> {
        check_signal(sig)?;
        Ok(self.actions[sig as usize])
    }

    /// Install `disposition`, returning the previous one
    pub fn set(&mut self, sig: u32, disposition: Disposition) -> KernelResult<Disposition> {
        check_signal(sig)?;
        if is_unblockable(sig) && disposition != Disposition::Default {
            return Err(KernelError::InvalidSignal);
        }
        if let Disposition::Custom(handler) = disposition {
            if handler.entry == 0 {
                return Err(KernelError::InvalidArgument);
            }
        }
        Ok(core::mem::replace(&mut self.actions[sig as usize], disposition))
    }

    /// Revert to default after a one-shot handler ran
    pub fn reset(&mut self, sig: u32) {
        if is_valid_signal(sig) {
            self.actions[sig as usize] = Disposition::Default;
        }
    }

    /// exec: custom handlers revert to default, ignored signals stay ignored
    pub fn reset_handlers(&mut self) {
        for action in self.actions.iter_mut() {
            if matches!(action, Disposition::Custom(_)) {
                *action = Disposition::Default;
            }
        }
    }

    /// Delivery would have no effect at all
    pub fn is_ignored(&self, sig: u32) -> bool {
        match self.actions.get(sig as usize) {
            Some(Disposition::Ignore) => true,
            Some(Disposition::Default) => default_action(sig) == DefaultAction::Ignore,
            _ => false,
        }
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new()
    }
}

/// sigaction record as passed through user memory
///
/// `handler`: 0 = default, 1 = ignore, anything else = entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct RawSigAction {
    pub handler: u64,
    pub mask: u64,
    pub flags: u64,
    pub restorer: u64,
}

pub const SIG_DFL: u64 = 0;
pub const SIG_IGN: u64 = 1;

impl RawSigAction {
    pub fn to_disposition(&self) -> Disposition {
        match self.handler {
            SIG_DFL => Disposition::Default,
            SIG_IGN => Disposition::Ignore,
            entry => Disposition::Custom(Handler {
                entry,
                mask: SigSet::from_bits(self.mask),
                flags: SaFlags::from_bits_truncate(self.flags as u32),
                restorer: self.restorer,
            }),
        }
    }

    pub fn from_disposition(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Default => Self { handler: SIG_DFL, ..Self::default() },
            Disposition::Ignore => Self { handler: SIG_IGN, ..Self::default() },
            Disposition::Custom(h) => Self {
                handler: h.entry,
                mask: h.mask.bits(),
                flags: h.flags.bits() as u64,
                restorer: h.restorer,
            },
        }
    }
}
