//! Cloudlet lifecycle: submit, pause, resume, move, cancel, return.
//!
//! Besides the state, a record tracks how much work is left so that
//! interrupted execution (pause, move) resumes where it stopped.

use crate::error::{KernelError, KernelResult};
use crate::payload::{CloudletId, CloudletResult, CloudletSnapshot, CloudletSpec, Subject, VmId};
use crate::tag::Tag;
use crate::time::VirtualTime;

/// States of a cloudlet. `Returned`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum CloudletState {
    Created,
    Submitted,
    InExecution,
    Paused,
    Cancelled,
    Moved,
    Returned,
    Failed,
}

impl CloudletState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CloudletState::Returned | CloudletState::Cancelled | CloudletState::Failed
        )
    }
}

impl std::fmt::Display for CloudletState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Slice {
    since: VirtualTime,
    duration: f64,
}

/// A cloudlet as its datacenter sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudletRecord {
    pub spec: CloudletSpec,
    state: CloudletState,
    vm: Option<VmId>,
    /// Work left, in million instructions.
    remaining_length: f64,
    /// Time spent executing so far.
    executed: f64,
    slice: Option<Slice>,
}

impl CloudletRecord {
    pub fn new(spec: CloudletSpec) -> Self {
        let remaining_length = spec.length;
        CloudletRecord {
            spec,
            state: CloudletState::Created,
            vm: None,
            remaining_length,
            executed: 0.0,
            slice: None,
        }
    }

    pub fn id(&self) -> CloudletId {
        self.spec.id
    }

    pub fn state(&self) -> CloudletState {
        self.state
    }

    pub fn vm(&self) -> Option<VmId> {
        self.vm
    }

    pub fn remaining_length(&self) -> f64 {
        self.remaining_length
    }

    pub fn executed(&self) -> f64 {
        self.executed
    }

    /// `InvalidTransition` unless the cloudlet is in one of `allowed`.
    pub fn expect_state(&self, tag: Tag, allowed: &[CloudletState]) -> KernelResult<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(KernelError::InvalidTransition {
            subject: Subject::Cloudlet(self.spec.id),
            from: self.state.to_string(),
            tag,
        })
    }

    fn transition(
        &mut self,
        tag: Tag,
        allowed: &[CloudletState],
        to: CloudletState,
    ) -> KernelResult<CloudletState> {
        let from = self.state;
        self.expect_state(tag, allowed)?;
        self.state = to;
        Ok(from)
    }

    /// Close the running slice, crediting the work done up to `now`.
    fn interrupt(&mut self, now: VirtualTime) {
        if let Some(slice) = self.slice.take() {
            let elapsed = now.duration_since(slice.since).unwrap_or(0.0);
            let done = if slice.duration > 0.0 {
                (elapsed / slice.duration).min(1.0)
            } else {
                1.0
            };
            self.remaining_length *= 1.0 - done;
            self.executed += elapsed;
        }
    }

    /// Created → Submitted, bound to `vm`.
    pub fn submit(&mut self, vm: VmId) -> KernelResult<()> {
        self.transition(
            Tag::CloudletSubmit,
            &[CloudletState::Created],
            CloudletState::Submitted,
        )?;
        self.vm = Some(vm);
        Ok(())
    }

    /// Submitted | Moved → InExecution. `duration` is the time the
    /// remaining work takes on the bound VM.
    pub fn start(&mut self, now: VirtualTime, duration: f64) -> KernelResult<()> {
        self.transition(
            Tag::VmDatacenterEvent,
            &[CloudletState::Submitted, CloudletState::Moved],
            CloudletState::InExecution,
        )?;
        self.slice = Some(Slice {
            since: now,
            duration,
        });
        Ok(())
    }

    /// InExecution → Paused.
    pub fn pause(&mut self, now: VirtualTime) -> KernelResult<()> {
        self.transition(
            Tag::CloudletPause,
            &[CloudletState::InExecution],
            CloudletState::Paused,
        )?;
        self.interrupt(now);
        Ok(())
    }

    /// Paused → InExecution.
    pub fn resume(&mut self, now: VirtualTime, duration: f64) -> KernelResult<()> {
        self.transition(
            Tag::CloudletResume,
            &[CloudletState::Paused],
            CloudletState::InExecution,
        )?;
        self.slice = Some(Slice {
            since: now,
            duration,
        });
        Ok(())
    }

    /// Submitted | InExecution | Paused → Cancelled.
    pub fn cancel(&mut self, now: VirtualTime) -> KernelResult<()> {
        self.transition(
            Tag::CloudletCancel,
            &[
                CloudletState::Submitted,
                CloudletState::InExecution,
                CloudletState::Paused,
            ],
            CloudletState::Cancelled,
        )?;
        self.interrupt(now);
        Ok(())
    }

    /// Submitted | InExecution | Paused → Moved, re-bound to `vm`.
    pub fn move_to(&mut self, vm: VmId, now: VirtualTime) -> KernelResult<()> {
        self.transition(
            Tag::CloudletMove,
            &[
                CloudletState::Submitted,
                CloudletState::InExecution,
                CloudletState::Paused,
            ],
            CloudletState::Moved,
        )?;
        self.interrupt(now);
        self.vm = Some(vm);
        Ok(())
    }

    /// InExecution → Returned, all work done.
    pub fn finish(&mut self, now: VirtualTime) -> KernelResult<()> {
        self.transition(
            Tag::CloudletReturn,
            &[CloudletState::InExecution],
            CloudletState::Returned,
        )?;
        self.interrupt(now);
        self.remaining_length = 0.0;
        Ok(())
    }

    /// Any non-terminal state → Failed.
    pub fn fail(&mut self, tag: Tag, now: VirtualTime) -> KernelResult<()> {
        self.transition(
            tag,
            &[
                CloudletState::Created,
                CloudletState::Submitted,
                CloudletState::InExecution,
                CloudletState::Paused,
                CloudletState::Moved,
            ],
            CloudletState::Failed,
        )?;
        self.interrupt(now);
        Ok(())
    }

    pub fn snapshot(&self) -> CloudletSnapshot {
        CloudletSnapshot {
            cloudlet: self.spec.id,
            state: Some(self.state),
            vm: self.vm,
        }
    }

    pub fn result(&self, now: VirtualTime) -> CloudletResult {
        CloudletResult {
            cloudlet: self.spec.id,
            state: self.state,
            vm: self.vm,
            finished_at: now,
            execution_time: self.executed,
        }
    }
}
