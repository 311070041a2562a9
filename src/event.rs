//! Event records for the dispatch kernel.
//!
//! Every interaction between entities is modeled as an `Event`. Events are
//! immutable once enqueued: the future event queue owns them until they are
//! delivered or cancelled.

use crate::ack::{AckId, AckLink};
use crate::entity::EntityId;
use crate::payload::Payload;
use crate::tag::Tag;
use crate::time::VirtualTime;

// ── Event ID ──────────────────────────────────────────────────────────

/// A globally unique, strictly-increasing event identifier.
///
/// The monotonic nature of `EventId` breaks ties in the queue: two events
/// due at the same `VirtualTime` are ordered by their `EventId`, which
/// corresponds to enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw u64 into an `EventId`.
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    /// Return the raw value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event ID Generator ───────────────────────────────────────────────

/// Deterministic, strictly-increasing event-ID generator.
///
/// Each queue owns exactly one of these. The kernel is single-threaded,
/// so the counter is trivially deterministic.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    /// Create a generator starting at 0.
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

// ── Ordering key ──────────────────────────────────────────────────────

/// Total order of the future event queue: delivery time, then enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub delivery_time: VirtualTime,
    pub id: EventId,
}

// ── Handle ────────────────────────────────────────────────────────────

/// Returned by every scheduling call; usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EventHandle {
    id: EventId,
    delivery_time: VirtualTime,
}

impl EventHandle {
    pub(crate) fn new(id: EventId, delivery_time: VirtualTime) -> Self {
        EventHandle { id, delivery_time }
    }

    pub fn id(self) -> EventId {
        self.id
    }

    pub fn delivery_time(self) -> VirtualTime {
        self.delivery_time
    }
}

// ── Envelope ──────────────────────────────────────────────────────────

/// An event before it is sent: everything the sender decides.
///
/// The kernel stamps the envelope with an id and the send/delivery times
/// when it enters the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub tag: Tag,
    pub source: EntityId,
    pub destination: EntityId,
    pub ack: Option<AckLink>,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(tag: Tag, source: EntityId, destination: EntityId) -> Self {
        Envelope {
            tag,
            source,
            destination,
            ack: None,
            payload: Payload::Empty,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub(crate) fn with_ack(mut self, link: AckLink) -> Self {
        self.ack = Some(link);
        self
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single delivered (or deliverable) event.
///
/// Invariant: `delivery_time >= send_time >= 0`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    /// Unique identifier (monotonically increasing).
    pub id: EventId,
    pub tag: Tag,
    pub source: EntityId,
    pub destination: EntityId,
    /// Clock value when the event was enqueued.
    pub send_time: VirtualTime,
    /// Clock value at which the event is delivered.
    pub delivery_time: VirtualTime,
    /// Set when the sender asked for an acknowledgement, or when this event
    /// is itself the acknowledgement.
    pub ack: Option<AckLink>,
    pub payload: Payload,
}

impl Event {
    pub(crate) fn stamp(
        id: EventId,
        envelope: Envelope,
        send_time: VirtualTime,
        delivery_time: VirtualTime,
    ) -> Self {
        debug_assert!(delivery_time >= send_time);
        Event {
            id,
            tag: envelope.tag,
            source: envelope.source,
            destination: envelope.destination,
            send_time,
            delivery_time,
            ack: envelope.ack,
            payload: envelope.payload,
        }
    }

    /// Position of this event in the queue's total order.
    pub fn key(&self) -> EventKey {
        EventKey {
            delivery_time: self.delivery_time,
            id: self.id,
        }
    }

    /// The acknowledgement the sender is waiting for, if any.
    pub fn requested_ack(&self) -> Option<AckId> {
        match self.ack {
            Some(AckLink::Request(id)) => Some(id),
            _ => None,
        }
    }

    /// The acknowledgement this event answers, if it is a reply.
    pub fn reply_to(&self) -> Option<AckId> {
        match self.ack {
            Some(AckLink::Reply(id)) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} → {} at {} [{}]",
            self.id, self.tag, self.source, self.destination, self.delivery_time, self.payload
        )
    }
}
