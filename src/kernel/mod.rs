//! The dispatch kernel.
//!
//! Owns the clock, the future event queue, the entity registry and the
//! acknowledgement correlator. The loop is purely synchronous and
//! single-threaded: pop the earliest event, advance the clock to it, hand
//! it to its destination, repeat.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`context`] | [`KernelContext`] handed to entity callbacks |
//! | [`report`] | [`RunReport`], [`Diagnostic`], [`EndReason`] |

pub mod context;
pub mod report;

use tracing::{debug, info, warn};

use crate::ack::{AckId, AckStatus, PendingAck};
use crate::config::KernelConfig;
use crate::entity::{hash_combine, trace_digest, Entity, EntityId, TraceEntry};
use crate::error::{KernelError, KernelResult};
use crate::event::{Envelope, Event, EventHandle, EventId};
use crate::payload::{AckOutcome, AckReply, FailureReason, Payload, Subject};
use crate::tag::Tag;
use crate::time::VirtualTime;

pub use context::KernelContext;
pub use report::{Diagnostic, EndReason, RunReport};

use context::Core;

/// Where the loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    /// END_OF_SIMULATION was delivered; only events queued before the
    /// boundary and due at the current instant are still delivered.
    Draining { boundary: EventId },
    Finished(EndReason),
}

/// Top-level simulation driver.
///
/// Construct one per run, register entities, seed events, then call
/// [`run`](Self::run) or drive it with [`step`](Self::step).
///
/// # Example
///
/// ```rust
/// use cirrus::kernel::{EndReason, Kernel};
///
/// let mut kernel = Kernel::new();
/// kernel.end_simulation(5.0).unwrap();
/// let report = kernel.run();
/// assert_eq!(report.end_reason, EndReason::EndOfSimulation);
/// assert_eq!(report.final_time.as_f64(), 5.0);
/// ```
pub struct Kernel {
    config: KernelConfig,
    core: Core,
    now: VirtualTime,
    phase: Phase,
    events_delivered: u64,
    events_dropped: u64,
    trace: Vec<TraceEntry>,
}

impl Kernel {
    /// Create a kernel with default settings, starting at time zero.
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Kernel {
            config,
            core: Core::default(),
            now: VirtualTime::ZERO,
            phase: Phase::Idle,
            events_delivered: 0,
            events_dropped: 0,
            trace: Vec::new(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Total events delivered so far.
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered
    }

    // ── Registry ──────────────────────────────────────────

    /// Register an entity under a unique name.
    pub fn register(&mut self, name: &str, entity: Box<dyn Entity>) -> KernelResult<EntityId> {
        let id = self.core.register(name, entity)?;
        info!(entity = %id, name, "registered entity");
        Ok(id)
    }

    pub fn deregister(&mut self, id: EntityId) -> bool {
        self.core.newcomers.retain(|n| *n != id);
        self.core.registry.deregister(id)
    }

    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.core.registry.lookup(name)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.core.registry.ids()
    }

    /// Downcast an entity reference for inspection.
    pub fn entity<T: Entity + 'static>(&self, id: EntityId) -> Option<&T> {
        self.core.registry.get::<T>(id)
    }

    pub fn entity_mut<T: Entity + 'static>(&mut self, id: EntityId) -> Option<&mut T> {
        self.core.registry.get_mut::<T>(id)
    }

    // ── Scheduling from outside ───────────────────────────

    /// Seed an event from outside any handler.
    pub fn schedule(
        &mut self,
        tag: Tag,
        source: EntityId,
        destination: EntityId,
        delay: f64,
        payload: Payload,
    ) -> KernelResult<EventHandle> {
        let env = Envelope::new(tag, source, destination).with_payload(payload);
        self.core.enqueue(self.now, env, delay)
    }

    pub fn schedule_now(
        &mut self,
        tag: Tag,
        source: EntityId,
        destination: EntityId,
        payload: Payload,
    ) -> EventHandle {
        let env = Envelope::new(tag, source, destination).with_payload(payload);
        let id = self.core.queue.insert(env, self.now, self.now);
        EventHandle::new(id, self.now)
    }

    /// Seed a request that expects an acknowledgement back at `source`.
    pub fn request(
        &mut self,
        tag: Tag,
        source: EntityId,
        destination: EntityId,
        delay: f64,
        payload: Payload,
    ) -> KernelResult<(EventHandle, AckId)> {
        let env = Envelope::new(tag, source, destination).with_payload(payload);
        self.core.request(self.now, env, delay)
    }

    /// Cancel a pending event. Never errors.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.core.queue.cancel(handle.id())
    }

    /// End the run gracefully `delay` from now.
    pub fn end_simulation(&mut self, delay: f64) -> KernelResult<EventHandle> {
        self.schedule(
            Tag::EndOfSimulation,
            EntityId::KERNEL,
            EntityId::KERNEL,
            delay,
            Payload::Empty,
        )
    }

    /// End the run abruptly `delay` from now.
    pub fn abort_simulation(&mut self, delay: f64) -> KernelResult<EventHandle> {
        self.schedule(
            Tag::AbruptEndOfSimulation,
            EntityId::KERNEL,
            EntityId::KERNEL,
            delay,
            Payload::Empty,
        )
    }

    pub fn pending_count(&self) -> usize {
        self.core.queue.len()
    }

    /// Pending events in delivery order.
    pub fn pending_events(&self) -> impl Iterator<Item = &Event> {
        self.core.queue.iter()
    }

    // ── Acknowledgements ──────────────────────────────────

    pub fn pending_acks(&self) -> impl Iterator<Item = &PendingAck> {
        self.core.acks.unresolved()
    }

    pub fn ack_status(&self, ack: AckId) -> AckStatus {
        self.core.acks.status(ack)
    }

    // ── Trace & diagnostics ───────────────────────────────

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.core.diagnostics
    }

    /// Deterministic hash over every entity's reported state.
    pub fn state_hash(&self) -> u64 {
        self.core.registry.iter().fold(0, |h, (id, e)| {
            hash_combine(hash_combine(h, id.raw() as u64), e.state_hash())
        })
    }

    // ── Execution ─────────────────────────────────────────

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished(_))
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        match self.phase {
            Phase::Finished(reason) => Some(reason),
            _ => None,
        }
    }

    /// Execute a single step: pop one event, advance time, dispatch.
    ///
    /// Returns `Some(event)` for every event taken off the queue (including
    /// control events and dropped ones), `None` once the run has ended.
    pub fn step(&mut self) -> Option<Event> {
        match self.phase {
            Phase::Finished(_) => return None,
            Phase::Idle => self.start(),
            _ => self.start_newcomers(),
        }

        if let Phase::Draining { boundary } = self.phase {
            let due = self
                .core
                .queue
                .peek_min()
                .is_some_and(|e| e.delivery_time == self.now && e.id < boundary);
            if !due {
                self.finish(EndReason::EndOfSimulation);
                return None;
            }
        }

        let Some(event) = self.core.queue.pop_min() else {
            self.finish(EndReason::QueueExhausted);
            return None;
        };

        // Virtual time must never go backward.
        debug_assert!(event.delivery_time >= self.now);
        self.now = event.delivery_time;

        match event.tag {
            Tag::AbruptEndOfSimulation => {
                info!(time = self.now.as_f64(), source = %event.source, "abrupt end requested");
                self.finish(EndReason::AbruptEnd);
            }
            Tag::EndOfSimulation => {
                if self.phase == Phase::Running {
                    info!(time = self.now.as_f64(), source = %event.source, "end of simulation requested");
                    self.phase = Phase::Draining {
                        boundary: self.core.queue.next_event_id(),
                    };
                }
            }
            _ => self.deliver(&event),
        }

        let limit_hit = self
            .config
            .max_events
            .is_some_and(|max| self.events_delivered >= max);
        if limit_hit && !self.is_finished() {
            self.finish(EndReason::EventLimit);
        }
        Some(event)
    }

    /// Run until the loop ends and return the report.
    pub fn run(&mut self) -> RunReport {
        while self.step().is_some() {}
        self.report()
    }

    /// Snapshot of the run so far.
    pub fn report(&self) -> RunReport {
        RunReport {
            end_reason: self.end_reason().unwrap_or(EndReason::QueueExhausted),
            final_time: self.now,
            events_delivered: self.events_delivered,
            events_dropped: self.events_dropped,
            events_undelivered: self.core.queue.len(),
            diagnostics: self.core.diagnostics.clone(),
            trace_digest: self.config.record_trace.then(|| trace_digest(&self.trace)),
        }
    }

    fn start(&mut self) {
        info!(
            entities = self.core.registry.len(),
            pending = self.core.queue.len(),
            "simulation starting"
        );
        self.phase = Phase::Running;
        if let Some(at) = self.config.terminate_at {
            let delay = (at - self.now.as_f64()).max(0.0);
            if let Err(e) = self.end_simulation(delay) {
                self.core.record(self.now, EntityId::KERNEL, e);
            }
        }
        self.start_newcomers();
    }

    /// Call `on_start` for every entity registered since the last call.
    fn start_newcomers(&mut self) {
        while !self.core.newcomers.is_empty() {
            let batch = std::mem::take(&mut self.core.newcomers);
            for id in batch {
                self.with_entity(id, |entity, ctx| entity.on_start(ctx));
            }
        }
    }

    fn deliver(&mut self, event: &Event) {
        let to = event.destination;
        let Some(role) = self.core.registry.role_of(to) else {
            self.drop_event(event);
            return;
        };

        if self.config.check_roles && !event.tag.accepts_receiver(role) {
            self.core.record(
                self.now,
                EntityId::KERNEL,
                KernelError::RoleMismatch {
                    tag: event.tag,
                    destination: to,
                    role,
                },
            );
        }

        debug!(
            event = %event.id,
            tag = %event.tag,
            from = %event.source,
            to = %to,
            time = self.now.as_f64(),
            payload = %event.payload,
            "dispatch"
        );
        if self.config.record_trace {
            self.trace.push(TraceEntry::of(event));
        }
        self.events_delivered += 1;
        self.with_entity(to, |entity, ctx| entity.on_event(ctx, event));
        self.start_newcomers();
    }

    /// The destination is not registered: report, and answer a pending
    /// acknowledgement with a failure so the requester is not left waiting.
    fn drop_event(&mut self, event: &Event) {
        warn!(
            event = %event.id,
            tag = %event.tag,
            to = %event.destination,
            "dropping event for unknown destination"
        );
        self.events_dropped += 1;
        self.core.record(
            self.now,
            EntityId::KERNEL,
            KernelError::UnknownDestination {
                event: event.id,
                tag: event.tag,
                destination: event.destination,
            },
        );

        let Some(ack) = event.requested_ack() else {
            return;
        };
        if self.core.acks.status(ack) != AckStatus::Pending {
            return;
        }
        let subject = event
            .payload
            .subject()
            .unwrap_or(Subject::Resource(event.destination));
        let reason = FailureReason::UnknownDestination;
        let reply = Payload::Ack(AckReply::failure(subject, reason.clone()));
        if let Err(e) = self.core.resolve(
            self.now,
            event.destination,
            ack,
            AckOutcome::Failure(reason),
            reply,
            0.0,
        ) {
            self.core.record(self.now, EntityId::KERNEL, e);
        }
    }

    /// Check `id` out of the registry, run `f` with a context, put it back.
    fn with_entity<F>(&mut self, id: EntityId, f: F)
    where
        F: FnOnce(&mut Box<dyn Entity>, &mut KernelContext),
    {
        let Some(mut entity) = self.core.registry.take(id) else {
            return;
        };
        {
            let mut ctx = KernelContext::new(&mut self.core, self.now, id);
            f(&mut entity, &mut ctx);
        }
        if !self.core.registry.restore(id, entity) {
            debug!(entity = %id, "entity deregistered during its own callback");
        }
    }

    fn finish(&mut self, reason: EndReason) {
        if reason == EndReason::QueueExhausted {
            let busy: Vec<EntityId> = self
                .core
                .registry
                .iter()
                .filter(|(_, e)| e.has_pending_work())
                .map(|(id, _)| id)
                .collect();
            for entity in busy {
                self.core.record(
                    self.now,
                    EntityId::KERNEL,
                    KernelError::IdleWithPendingWork { entity },
                );
            }
        }

        if matches!(reason, EndReason::EndOfSimulation | EndReason::QueueExhausted) {
            for id in self.core.registry.ids() {
                self.with_entity(id, |entity, ctx| entity.on_shutdown(ctx));
            }
        }

        for ack in self.core.acks.drain_unresolved() {
            self.core.record(
                self.now,
                EntityId::KERNEL,
                KernelError::UnresolvedAckAtShutdown {
                    ack: ack.id,
                    tag: ack.request_tag,
                    requester: ack.requester,
                    target: ack.target,
                    waiting_since: ack.waiting_since,
                },
            );
        }

        info!(
            reason = %reason,
            time = self.now.as_f64(),
            delivered = self.events_delivered,
            undelivered = self.core.queue.len(),
            diagnostics = self.core.diagnostics.len(),
            "simulation finished"
        );
        self.phase = Phase::Finished(reason);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
