//! `KernelContext` — the handle an entity uses to act on the world.

use tracing::warn;

use crate::ack::{AckCorrelator, AckId, AckLink, AckStatus, PendingAck};
use crate::entity::{Entity, EntityId, EntityRegistry};
use crate::error::{KernelError, KernelResult};
use crate::event::{Envelope, Event, EventHandle};
use crate::payload::{AckOutcome, AckReply, Payload, Subject};
use crate::queue::FutureEventQueue;
use crate::tag::Tag;
use crate::time::VirtualTime;

use super::report::Diagnostic;

// ── Core ──────────────────────────────────────────────────────────────

/// Kernel state reachable from inside a handler.
#[derive(Debug, Default)]
pub(crate) struct Core {
    pub(crate) queue: FutureEventQueue,
    pub(crate) registry: EntityRegistry,
    pub(crate) acks: AckCorrelator,
    pub(crate) diagnostics: Vec<Diagnostic>,
    /// Registered but not yet started.
    pub(crate) newcomers: Vec<EntityId>,
}

impl Core {
    pub(crate) fn enqueue(
        &mut self,
        now: VirtualTime,
        envelope: Envelope,
        delay: f64,
    ) -> KernelResult<EventHandle> {
        let at = now.plus(delay).ok_or(KernelError::InvalidDelay { delay })?;
        let id = self.queue.insert(envelope, now, at);
        Ok(EventHandle::new(id, at))
    }

    pub(crate) fn request(
        &mut self,
        now: VirtualTime,
        envelope: Envelope,
        delay: f64,
    ) -> KernelResult<(EventHandle, AckId)> {
        if now.plus(delay).is_none() {
            return Err(KernelError::InvalidDelay { delay });
        }
        let ack = self
            .acks
            .open(envelope.tag, envelope.source, envelope.destination, now);
        let handle = self.enqueue(now, envelope.with_ack(AckLink::Request(ack)), delay)?;
        Ok((handle, ack))
    }

    /// Settle `ack` and schedule the reply to its requester.
    pub(crate) fn resolve(
        &mut self,
        now: VirtualTime,
        replier: EntityId,
        ack: AckId,
        outcome: AckOutcome,
        payload: Payload,
        delay: f64,
    ) -> KernelResult<EventHandle> {
        if now.plus(delay).is_none() {
            return Err(KernelError::InvalidDelay { delay });
        }
        let settled = self.acks.resolve(ack, outcome)?;
        let reply = Envelope::new(settled.reply_tag, replier, settled.requester)
            .with_payload(payload)
            .with_ack(AckLink::Reply(ack));
        self.enqueue(now, reply, delay)
    }

    pub(crate) fn record(&mut self, at: VirtualTime, reporter: EntityId, error: KernelError) {
        warn!(time = at.as_f64(), reporter = %reporter, error = %error, "diagnostic");
        self.diagnostics.push(Diagnostic {
            at,
            reporter,
            error,
        });
    }

    pub(crate) fn register(
        &mut self,
        name: &str,
        entity: Box<dyn Entity>,
    ) -> KernelResult<EntityId> {
        let id = self.registry.register(name, entity)?;
        self.newcomers.push(id);
        Ok(id)
    }
}

// ── Kernel Context ────────────────────────────────────────────────────

/// Mutable context passed to an entity on every callback.
///
/// Provides the entity with:
/// - the current virtual time and its own id
/// - scheduling, cancellation and broadcast
/// - request/acknowledgement correlation
/// - registry access and diagnostics
///
/// The context borrows kernel state mutably, so a handler cannot
/// interfere with dispatch ordering outside of this API.
pub struct KernelContext<'a> {
    pub(crate) core: &'a mut Core,
    pub(crate) now: VirtualTime,
    pub(crate) self_id: EntityId,
}

impl<'a> KernelContext<'a> {
    pub(crate) fn new(core: &'a mut Core, now: VirtualTime, self_id: EntityId) -> Self {
        KernelContext { core, now, self_id }
    }

    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Id of the entity being called.
    #[inline]
    pub fn self_id(&self) -> EntityId {
        self.self_id
    }

    // ── Scheduling ────────────────────────────────────────

    /// Send `payload` under `tag` to `destination`, delivered `delay`
    /// after now. Fails with `InvalidDelay` for negative or non-finite
    /// delays.
    pub fn schedule(
        &mut self,
        tag: Tag,
        destination: EntityId,
        delay: f64,
        payload: Payload,
    ) -> KernelResult<EventHandle> {
        let env = Envelope::new(tag, self.self_id, destination).with_payload(payload);
        self.core.enqueue(self.now, env, delay)
    }

    /// Send at the current instant, after everything already queued for it.
    pub fn schedule_now(&mut self, tag: Tag, destination: EntityId, payload: Payload) -> EventHandle {
        let env = Envelope::new(tag, self.self_id, destination).with_payload(payload);
        let id = self.core.queue.insert(env, self.now, self.now);
        EventHandle::new(id, self.now)
    }

    /// Send an event to the calling entity itself.
    pub fn schedule_self(&mut self, tag: Tag, delay: f64, payload: Payload) -> KernelResult<EventHandle> {
        self.schedule(tag, self.self_id, delay, payload)
    }

    /// Cancel a pending event. Returns `false` if it was already delivered
    /// or cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.core.queue.cancel(handle.id())
    }

    /// Cancel every pending event matching `pred`.
    pub fn cancel_where<F>(&mut self, pred: F) -> usize
    where
        F: FnMut(&Event) -> bool,
    {
        self.core.queue.cancel_where(pred)
    }

    /// Send `tag` to every other registered entity, in id order.
    pub fn broadcast(&mut self, tag: Tag, payload: Payload) -> Vec<EventHandle> {
        let targets: Vec<EntityId> = self
            .core
            .registry
            .ids()
            .into_iter()
            .filter(|id| *id != self.self_id)
            .collect();
        targets
            .into_iter()
            .map(|to| self.schedule_now(tag, to, payload.clone()))
            .collect()
    }

    /// Number of pending events in the queue.
    pub fn pending_count(&self) -> usize {
        self.core.queue.len()
    }

    // ── Acknowledgements ──────────────────────────────────

    /// Send a request and open an acknowledgement for it.
    ///
    /// The reply arrives as an event whose [`Event::reply_to`] is the
    /// returned `AckId`.
    pub fn request(
        &mut self,
        tag: Tag,
        destination: EntityId,
        delay: f64,
        payload: Payload,
    ) -> KernelResult<(EventHandle, AckId)> {
        let env = Envelope::new(tag, self.self_id, destination).with_payload(payload);
        self.core.request(self.now, env, delay)
    }

    /// Resolve `ack` with `outcome`, delivering `payload` to the requester
    /// `delay` after now.
    pub fn resolve(
        &mut self,
        ack: AckId,
        outcome: AckOutcome,
        payload: Payload,
        delay: f64,
    ) -> KernelResult<EventHandle> {
        self.core
            .resolve(self.now, self.self_id, ack, outcome, payload, delay)
    }

    /// Answer a request with an [`AckReply`] at the current instant.
    ///
    /// Returns `Ok(None)` when the sender did not ask for an
    /// acknowledgement.
    pub fn acknowledge(&mut self, event: &Event, outcome: AckOutcome) -> KernelResult<Option<EventHandle>> {
        self.acknowledge_after(event, outcome, 0.0)
    }

    /// Like [`acknowledge`](Self::acknowledge), delivered `delay` after now.
    pub fn acknowledge_after(
        &mut self,
        event: &Event,
        outcome: AckOutcome,
        delay: f64,
    ) -> KernelResult<Option<EventHandle>> {
        let Some(ack) = event.requested_ack() else {
            return Ok(None);
        };
        let subject = event
            .payload
            .subject()
            .unwrap_or(Subject::Resource(self.self_id));
        let reply = Payload::Ack(AckReply {
            subject,
            outcome: outcome.clone(),
        });
        self.resolve(ack, outcome, reply, delay).map(Some)
    }

    /// Answer a query. Resolves the sender's acknowledgement when it asked
    /// for one; otherwise sends `payload` back under the tag's reply tag.
    pub fn reply(&mut self, event: &Event, payload: Payload) -> KernelResult<EventHandle> {
        match event.requested_ack() {
            Some(ack) => self.resolve(ack, AckOutcome::Success, payload, 0.0),
            None => {
                let tag = event.tag.reply_tag().unwrap_or(event.tag);
                Ok(self.schedule_now(tag, event.source, payload))
            }
        }
    }

    pub fn ack_status(&self, ack: AckId) -> AckStatus {
        self.core.acks.status(ack)
    }

    pub fn pending_ack(&self, ack: AckId) -> Option<&PendingAck> {
        self.core.acks.get(ack)
    }

    // ── Registry ──────────────────────────────────────────

    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.core.registry.lookup(name)
    }

    pub fn name_of(&self, id: EntityId) -> Option<&str> {
        self.core.registry.name_of(id)
    }

    pub fn is_registered(&self, id: EntityId) -> bool {
        self.core.registry.contains(id)
    }

    /// Register a new entity. It is started right after the current
    /// dispatch returns.
    pub fn register(&mut self, name: &str, entity: Box<dyn Entity>) -> KernelResult<EntityId> {
        self.core.register(name, entity)
    }

    /// Deregister an entity (possibly the caller). Events still addressed
    /// to it are reported as dispatch errors when they come due.
    pub fn deregister(&mut self, id: EntityId) -> bool {
        self.core.registry.deregister(id)
    }

    // ── Run control ───────────────────────────────────────

    /// Record a non-fatal error in the run report.
    pub fn record(&mut self, error: KernelError) {
        self.core.record(self.now, self.self_id, error);
    }

    /// Ask the kernel to end the run gracefully `delay` after now.
    pub fn end_simulation(&mut self, delay: f64) -> KernelResult<EventHandle> {
        self.schedule(Tag::EndOfSimulation, EntityId::KERNEL, delay, Payload::Empty)
    }

    /// Schedule ABRUPT_END_OF_SIMULATION at the current instant. Nothing
    /// queued behind it is delivered and no shutdown hooks run.
    pub fn abort_simulation(&mut self) -> EventHandle {
        self.schedule_now(Tag::AbruptEndOfSimulation, EntityId::KERNEL, Payload::Empty)
    }
}
