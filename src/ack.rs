//! Acknowledgement correlation.
//!
//! A request that wants an answer is tagged with a fresh [`AckId`] when it
//! is sent. The correlator keeps one [`PendingAck`] per outstanding id until
//! the target (or the kernel, on the target's behalf) resolves it. The
//! requester never blocks: it returns from its handler and resumes when the
//! reply event carrying the same `AckId` is delivered.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::EntityId;
use crate::error::{KernelError, KernelResult};
use crate::payload::AckOutcome;
use crate::tag::Tag;
use crate::time::VirtualTime;

/// Correlation key shared by a request and its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AckId(u64);

impl AckId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        AckId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A#{}", self.0)
    }
}

/// How an event relates to an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum AckLink {
    /// The sender waits for a reply under this id.
    Request(AckId),
    /// This event is the reply.
    Reply(AckId),
}

impl AckLink {
    pub fn id(self) -> AckId {
        match self {
            AckLink::Request(id) | AckLink::Reply(id) => id,
        }
    }
}

/// One outstanding request/acknowledgement pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PendingAck {
    pub id: AckId,
    /// Tag of the original request.
    pub request_tag: Tag,
    /// Tag the reply travels under.
    pub reply_tag: Tag,
    pub requester: EntityId,
    pub target: EntityId,
    pub waiting_since: VirtualTime,
    pub resolved: bool,
    pub result: Option<AckOutcome>,
}

/// Where an acknowledgement currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Pending,
    Resolved,
    Unknown,
}

/// Owns every pending acknowledgement of a run.
#[derive(Debug, Clone, Default)]
pub struct AckCorrelator {
    next: u64,
    pending: BTreeMap<AckId, PendingAck>,
    settled: BTreeSet<AckId>,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new outstanding request and return its correlation key.
    pub fn open(
        &mut self,
        request_tag: Tag,
        requester: EntityId,
        target: EntityId,
        now: VirtualTime,
    ) -> AckId {
        let id = AckId(self.next);
        self.next += 1;
        let reply_tag = request_tag.reply_tag().unwrap_or(request_tag);
        self.pending.insert(
            id,
            PendingAck {
                id,
                request_tag,
                reply_tag,
                requester,
                target,
                waiting_since: now,
                resolved: false,
                result: None,
            },
        );
        id
    }

    /// Mark `id` resolved with `outcome` and hand back the settled record.
    ///
    /// The record leaves the pending set. Resolving the same id twice yields
    /// `DuplicateResolution`; an id that was never issued yields `UnknownAck`.
    pub fn resolve(&mut self, id: AckId, outcome: AckOutcome) -> KernelResult<PendingAck> {
        match self.pending.remove(&id) {
            Some(mut ack) => {
                ack.resolved = true;
                ack.result = Some(outcome);
                self.settled.insert(id);
                Ok(ack)
            }
            None if self.settled.contains(&id) => Err(KernelError::DuplicateResolution { ack: id }),
            None => Err(KernelError::UnknownAck { ack: id }),
        }
    }

    pub fn get(&self, id: AckId) -> Option<&PendingAck> {
        self.pending.get(&id)
    }

    pub fn status(&self, id: AckId) -> AckStatus {
        if self.pending.contains_key(&id) {
            AckStatus::Pending
        } else if self.settled.contains(&id) {
            AckStatus::Resolved
        } else {
            AckStatus::Unknown
        }
    }

    /// Outstanding acknowledgements in issue order.
    pub fn unresolved(&self) -> impl Iterator<Item = &PendingAck> {
        self.pending.values()
    }

    /// Remove and return every outstanding acknowledgement.
    pub fn drain_unresolved(&mut self) -> Vec<PendingAck> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::FailureReason;

    fn open(c: &mut AckCorrelator, tag: Tag) -> AckId {
        c.open(tag, EntityId::new(1), EntityId::new(2), VirtualTime::new(1.0))
    }

    #[test]
    fn test_open_assigns_unique_ids() {
        let mut c = AckCorrelator::new();
        let a = open(&mut c, Tag::VmCreate);
        let b = open(&mut c, Tag::VmCreate);
        assert_ne!(a, b);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(a).map(|p| p.reply_tag), Some(Tag::VmCreateAck));
    }

    #[test]
    fn test_resolve_removes_pending() {
        let mut c = AckCorrelator::new();
        let a = open(&mut c, Tag::CloudletPause);
        let settled = c.resolve(a, AckOutcome::Success).unwrap();
        assert!(settled.resolved);
        assert_eq!(settled.result, Some(AckOutcome::Success));
        assert_eq!(settled.reply_tag, Tag::CloudletPauseAck);
        assert!(c.is_empty());
        assert_eq!(c.status(a), AckStatus::Resolved);
    }

    #[test]
    fn test_duplicate_resolution_is_an_error() {
        let mut c = AckCorrelator::new();
        let a = open(&mut c, Tag::VmDestroy);
        c.resolve(a, AckOutcome::Success).unwrap();
        let err = c
            .resolve(a, AckOutcome::Failure(FailureReason::NoResources))
            .unwrap_err();
        assert_eq!(err, KernelError::DuplicateResolution { ack: a });
    }

    #[test]
    fn test_unknown_ack() {
        let mut c = AckCorrelator::new();
        let ghost = AckId::new(41);
        assert_eq!(c.status(ghost), AckStatus::Unknown);
        assert_eq!(
            c.resolve(ghost, AckOutcome::Success),
            Err(KernelError::UnknownAck { ack: ghost })
        );
    }

    #[test]
    fn test_drain_unresolved_in_issue_order() {
        let mut c = AckCorrelator::new();
        let a = open(&mut c, Tag::VmCreate);
        let b = open(&mut c, Tag::VmMigrate);
        let d = open(&mut c, Tag::CloudletSubmit);
        c.resolve(b, AckOutcome::Success).unwrap();

        let left: Vec<AckId> = c.drain_unresolved().iter().map(|p| p.id).collect();
        assert_eq!(left, vec![a, d]);
        assert!(c.is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AckId::new(5).to_string(), "A#5");
    }
}
