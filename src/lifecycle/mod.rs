//! Lifecycle state machines for VMs and cloudlets.
//!
//! Records are owned by the datacenter that hosts them and change only
//! inside its event handler. Every transition checks the current state and
//! returns `InvalidTransition` without touching the record when the event
//! is not allowed.

pub mod cloudlet;
pub mod vm;

pub use cloudlet::{CloudletRecord, CloudletState};
pub use vm::{VmRecord, VmState};
