//! Entity ID — a lightweight, ordered, copyable entity identifier.

/// A unique identifier for a registered entity.
///
/// Assigned by the registry at registration time and never handed out
/// again, even after the entity is deregistered. Id `0` is reserved for
/// the kernel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId(u32);

impl EntityId {
    /// Pseudo-entity used as source and destination of kernel control events.
    pub const KERNEL: EntityId = EntityId(0);

    /// Create an entity ID from a raw integer.
    #[inline]
    pub fn new(id: u32) -> Self {
        EntityId(id)
    }

    /// Return the underlying integer.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_kernel(self) -> bool {
        self == Self::KERNEL
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
