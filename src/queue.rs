//! The future event queue.
//!
//! Ordered store of not-yet-delivered events keyed by
//! `(delivery_time, event_id)`. Because event IDs are strictly increasing,
//! two events due at the same instant leave the queue in the order they
//! entered it, so two runs with the same entity logic always produce the
//! same dispatch order.

use std::collections::{BTreeMap, HashMap};

use crate::event::{Envelope, Event, EventId, EventIdGen, EventKey};
use crate::time::VirtualTime;

/// The kernel's pending-event store.
///
/// Owns the event map and the ID generator. All scheduling goes through
/// this struct to keep IDs monotonic and the order total.
#[derive(Debug, Clone, Default)]
pub struct FutureEventQueue {
    /// Pending events in delivery order.
    events: BTreeMap<EventKey, Event>,

    /// Event ID → delivery time, so cancellation can find the map key.
    index: HashMap<EventId, VirtualTime>,

    /// Monotonic event-ID generator.
    id_gen: EventIdGen,
}

impl FutureEventQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `envelope` and insert it.
    ///
    /// Returns the `EventId` assigned to this event.
    pub fn insert(
        &mut self,
        envelope: Envelope,
        send_time: VirtualTime,
        delivery_time: VirtualTime,
    ) -> EventId {
        let id = self.id_gen.next_id();
        let event = Event::stamp(id, envelope, send_time, delivery_time);
        self.index.insert(id, delivery_time);
        self.events.insert(event.key(), event);
        id
    }

    /// Peek at the next event without removing it.
    pub fn peek_min(&self) -> Option<&Event> {
        self.events.values().next()
    }

    /// Pop the next event (earliest time, lowest ID).
    ///
    /// Returns `None` when the queue is empty.
    pub fn pop_min(&mut self) -> Option<Event> {
        let (_, event) = self.events.pop_first()?;
        self.index.remove(&event.id);
        Some(event)
    }

    /// Remove a pending event. Returns `false` if the event was already
    /// delivered, already cancelled, or never existed.
    pub fn cancel(&mut self, id: EventId) -> bool {
        match self.index.remove(&id) {
            Some(delivery_time) => self
                .events
                .remove(&EventKey { delivery_time, id })
                .is_some(),
            None => false,
        }
    }

    /// Remove every pending event matching `pred`. Returns how many were
    /// removed.
    pub fn cancel_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&Event) -> bool,
    {
        let doomed: Vec<EventKey> = self
            .events
            .values()
            .filter(|e| pred(e))
            .map(Event::key)
            .collect();
        for key in &doomed {
            self.events.remove(key);
            self.index.remove(&key.id);
        }
        doomed.len()
    }

    /// Whether `id` is still waiting for delivery.
    pub fn contains(&self, id: EventId) -> bool {
        self.index.contains_key(&id)
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns the next event ID that will be assigned.
    pub fn next_event_id(&self) -> EventId {
        self.id_gen.peek()
    }

    /// Iterate pending events in delivery order without removing them.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    /// Drain all events in deterministic order into a `Vec`.
    pub fn drain_ordered(&mut self) -> Vec<Event> {
        self.index.clear();
        std::mem::take(&mut self.events).into_values().collect()
    }
}
