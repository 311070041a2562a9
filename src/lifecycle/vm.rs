//! VM lifecycle: create, boot, migrate, destroy.

use crate::error::{KernelError, KernelResult};
use crate::payload::{HostId, Subject, VmId, VmSpec};
use crate::tag::Tag;

/// States of a virtual machine. `Destroyed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum VmState {
    Requested,
    Created,
    Running,
    Migrating,
    Destroyed,
    Failed,
}

impl VmState {
    pub fn is_terminal(self) -> bool {
        matches!(self, VmState::Destroyed | VmState::Failed)
    }

    /// Whether cloudlets may be bound to a VM in this state.
    pub fn accepts_work(self) -> bool {
        matches!(self, VmState::Created | VmState::Running | VmState::Migrating)
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A VM as its datacenter sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct VmRecord {
    pub spec: VmSpec,
    state: VmState,
    host: Option<HostId>,
    migrating_to: Option<HostId>,
}

impl VmRecord {
    /// A freshly requested VM, not yet placed.
    pub fn new(spec: VmSpec) -> Self {
        VmRecord {
            spec,
            state: VmState::Requested,
            host: None,
            migrating_to: None,
        }
    }

    pub fn id(&self) -> VmId {
        self.spec.id
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Host the VM currently runs on.
    pub fn host(&self) -> Option<HostId> {
        self.host
    }

    /// Destination of an in-flight migration.
    pub fn migrating_to(&self) -> Option<HostId> {
        self.migrating_to
    }

    /// `InvalidTransition` unless the VM is in one of `allowed`.
    pub fn expect_state(&self, tag: Tag, allowed: &[VmState]) -> KernelResult<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(KernelError::InvalidTransition {
            subject: Subject::Vm(self.spec.id),
            from: self.state.to_string(),
            tag,
        })
    }

    fn transition(&mut self, tag: Tag, allowed: &[VmState], to: VmState) -> KernelResult<VmState> {
        let from = self.state;
        self.expect_state(tag, allowed)?;
        self.state = to;
        Ok(from)
    }

    /// Requested → Created on `host`.
    pub fn place(&mut self, host: HostId) -> KernelResult<()> {
        self.transition(Tag::VmCreate, &[VmState::Requested], VmState::Created)?;
        self.host = Some(host);
        Ok(())
    }

    /// Requested → Failed: no host had room.
    pub fn reject(&mut self) -> KernelResult<()> {
        self.transition(Tag::VmCreate, &[VmState::Requested], VmState::Failed)
            .map(|_| ())
    }

    /// Created → Running.
    pub fn boot(&mut self) -> KernelResult<()> {
        self.transition(Tag::VmDatacenterEvent, &[VmState::Created], VmState::Running)
            .map(|_| ())
    }

    /// Created | Running → Destroyed. Returns the host that was released.
    pub fn destroy(&mut self) -> KernelResult<Option<HostId>> {
        self.transition(
            Tag::VmDestroy,
            &[VmState::Created, VmState::Running],
            VmState::Destroyed,
        )?;
        Ok(self.host.take())
    }

    /// Running → Migrating towards `target`.
    pub fn begin_migration(&mut self, target: HostId) -> KernelResult<()> {
        self.transition(Tag::VmMigrate, &[VmState::Running], VmState::Migrating)?;
        self.migrating_to = Some(target);
        Ok(())
    }

    /// Migrating → Running on the new host. Returns the host left behind.
    pub fn complete_migration(&mut self) -> KernelResult<Option<HostId>> {
        self.transition(Tag::VmDatacenterEvent, &[VmState::Migrating], VmState::Running)?;
        let previous = self.host;
        self.host = self.migrating_to.take().or(previous);
        Ok(previous)
    }

    /// Any non-terminal state → Failed.
    pub fn fail(&mut self, tag: Tag) -> KernelResult<()> {
        self.transition(
            tag,
            &[
                VmState::Requested,
                VmState::Created,
                VmState::Running,
                VmState::Migrating,
            ],
            VmState::Failed,
        )?;
        self.host = None;
        self.migrating_to = None;
        Ok(())
    }
}
