//! `Entity` trait and the roles entities play in the message protocol.

use crate::event::Event;
use crate::kernel::KernelContext;

// ── Role ──────────────────────────────────────────────────────────────

/// The part an entity plays; decides which tags it may legally receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// The kernel's own pseudo-entity.
    Kernel,
    InformationService,
    /// A resource provider.
    Datacenter,
    Broker,
    /// Accepts anything; the default for collaborator-defined entities.
    Any,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Kernel => "kernel",
            Role::InformationService => "information-service",
            Role::Datacenter => "datacenter",
            Role::Broker => "broker",
            Role::Any => "any",
        };
        f.write_str(s)
    }
}

// ── Entity ────────────────────────────────────────────────────────────

/// Trait implemented by every simulated entity.
///
/// Entities react to delivered [`Event`]s via `on_event` and may schedule
/// follow-up events through the provided [`KernelContext`]. The kernel
/// guarantees a handler is never re-entered while it runs.
///
/// # Contract
///
/// Implementations **must**:
/// - Not use global mutable state.
/// - Route all side effects through `ctx`.
/// - Be deterministic for equal inputs.
///
/// # Example
///
/// ```rust
/// use cirrus::entity::Entity;
/// use cirrus::event::Event;
/// use cirrus::kernel::KernelContext;
///
/// struct Counter { seen: u32 }
///
/// impl Entity for Counter {
///     fn on_event(&mut self, _ctx: &mut KernelContext, _event: &Event) {
///         self.seen += 1;
///     }
///     fn as_any(&self) -> &dyn std::any::Any { self }
///     fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
/// }
/// ```
pub trait Entity {
    /// The role this entity plays. Fixed for the entity's lifetime.
    fn role(&self) -> Role {
        Role::Any
    }

    /// Called once before the entity receives its first event.
    fn on_start(&mut self, _ctx: &mut KernelContext) {}

    /// React to a delivered event.
    fn on_event(&mut self, ctx: &mut KernelContext, event: &Event);

    /// Called on graceful end of the run. Events scheduled here are never
    /// delivered.
    fn on_shutdown(&mut self, _ctx: &mut KernelContext) {}

    /// Whether the entity still expects to do something. Checked when the
    /// queue runs dry.
    fn has_pending_work(&self) -> bool {
        false
    }

    /// Return a deterministic hash of this entity's current state.
    ///
    /// The default returns `0` (opt-out).
    fn state_hash(&self) -> u64 {
        0
    }

    /// Downcast support, required for `Kernel::entity::<T>()`.
    fn as_any(&self) -> &dyn std::any::Any;
    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
