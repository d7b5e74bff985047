//! POSIX signals
//!
//! Handler tables live in the process, pending/blocked sets in each thread.
//! Delivery happens at safe points through [`Kernel::handle_pending`].
//!
//! [`Kernel::handle_pending`]: crate::Kernel::handle_pending

pub mod action;
mod delivery;
pub mod frame;
pub mod info;
pub mod pending;
pub mod types;

pub use action::{default_action, DefaultAction, Disposition, Handler, RawSigAction, SaFlags, SignalTable};
pub use delivery::{SignalDelivery, SignalTarget};
pub use frame::SignalFrame;
pub use info::{RawSigInfo, SigCode, SigInfo};
pub use pending::SignalState;
pub use types::*;
