//! `EntityRegistry` — owns every registered entity.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{KernelError, KernelResult};

use super::id::EntityId;
use super::traits::{Entity, Role};

struct Slot {
    name: String,
    role: Role,
    /// `None` while the entity is checked out for dispatch.
    entity: Option<Box<dyn Entity>>,
}

/// Addressable set of entities.
///
/// Entities are stored by id in a `BTreeMap` so iteration (startup,
/// broadcast, shutdown) is always in registration order. During dispatch
/// the kernel checks an entity out with [`take`](Self::take) and puts it
/// back with [`restore`](Self::restore), which lets the handler hold a
/// mutable kernel context that itself reaches the registry.
pub struct EntityRegistry {
    slots: BTreeMap<EntityId, Slot>,
    names: HashMap<String, EntityId>,
    retired: BTreeSet<EntityId>,
    next: u32,
}

impl EntityRegistry {
    pub fn new() -> Self {
        EntityRegistry {
            slots: BTreeMap::new(),
            names: HashMap::new(),
            retired: BTreeSet::new(),
            next: EntityId::KERNEL.raw() + 1,
        }
    }

    /// Register `entity` under `name` and assign it a fresh id.
    pub fn register(&mut self, name: &str, entity: Box<dyn Entity>) -> KernelResult<EntityId> {
        if self.names.contains_key(name) {
            return Err(KernelError::NameTaken {
                name: name.to_string(),
            });
        }
        let id = EntityId::new(self.next);
        self.next += 1;
        self.names.insert(name.to_string(), id);
        self.slots.insert(
            id,
            Slot {
                name: name.to_string(),
                role: entity.role(),
                entity: Some(entity),
            },
        );
        Ok(id)
    }

    /// Remove an entity. Its id is retired and never handed out again.
    ///
    /// Returns `false` if `id` was not registered. An entity deregistered
    /// while checked out is dropped when it is restored.
    pub fn deregister(&mut self, id: EntityId) -> bool {
        match self.slots.remove(&id) {
            Some(slot) => {
                self.names.remove(&slot.name);
                self.retired.insert(id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn is_retired(&self, id: EntityId) -> bool {
        self.retired.contains(&id)
    }

    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: EntityId) -> Option<&str> {
        self.slots.get(&id).map(|s| s.name.as_str())
    }

    pub fn role_of(&self, id: EntityId) -> Option<Role> {
        self.slots.get(&id).map(|s| s.role)
    }

    /// Check an entity out for dispatch.
    pub(crate) fn take(&mut self, id: EntityId) -> Option<Box<dyn Entity>> {
        self.slots.get_mut(&id)?.entity.take()
    }

    /// Put a checked-out entity back. Returns `false` (and drops the
    /// entity) if it was deregistered in the meantime.
    pub(crate) fn restore(&mut self, id: EntityId, entity: Box<dyn Entity>) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.entity = Some(entity);
                true
            }
            None => false,
        }
    }

    /// All registered ids in registration order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.slots.keys().copied().collect()
    }

    /// Downcast an entity reference for inspection.
    ///
    /// Returns `None` if the entity is not registered, is checked out, or
    /// has a different type.
    pub fn get<T: Entity + 'static>(&self, id: EntityId) -> Option<&T> {
        self.slots
            .get(&id)?
            .entity
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Downcast a mutable entity reference.
    pub fn get_mut<T: Entity + 'static>(&mut self, id: EntityId) -> Option<&mut T> {
        self.slots
            .get_mut(&id)?
            .entity
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// Registered entities that are not checked out, in id order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntityId, &dyn Entity)> {
        self.slots
            .iter()
            .filter_map(|(id, slot)| slot.entity.as_deref().map(|e| (*id, e)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.slots.iter().map(|(id, s)| (id, (&s.name, s.role))))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::kernel::KernelContext;

    struct Dummy(u32);

    impl Entity for Dummy {
        fn role(&self) -> Role {
            Role::Broker
        }
        fn on_event(&mut self, _ctx: &mut KernelContext, _event: &Event) {}
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_ids_start_after_kernel() {
        let mut reg = EntityRegistry::new();
        let a = reg.register("a", Box::new(Dummy(1))).unwrap();
        let b = reg.register("b", Box::new(Dummy(2))).unwrap();
        assert_eq!(a, EntityId::new(1));
        assert_eq!(b, EntityId::new(2));
        assert_eq!(reg.role_of(a), Some(Role::Broker));
        assert_eq!(reg.lookup("b"), Some(b));
        assert_eq!(reg.name_of(a), Some("a"));
    }

    #[test]
    fn test_name_taken() {
        let mut reg = EntityRegistry::new();
        reg.register("dc", Box::new(Dummy(1))).unwrap();
        let err = reg.register("dc", Box::new(Dummy(2))).unwrap_err();
        assert_eq!(err, KernelError::NameTaken { name: "dc".into() });
    }

    #[test]
    fn test_ids_never_reused() {
        let mut reg = EntityRegistry::new();
        let a = reg.register("a", Box::new(Dummy(1))).unwrap();
        assert!(reg.deregister(a));
        assert!(!reg.deregister(a));
        assert!(reg.is_retired(a));
        let again = reg.register("a", Box::new(Dummy(1))).unwrap();
        assert_ne!(again, a);
    }

    #[test]
    fn test_take_and_restore() {
        let mut reg = EntityRegistry::new();
        let a = reg.register("a", Box::new(Dummy(5))).unwrap();

        let e = reg.take(a).unwrap();
        assert!(reg.get::<Dummy>(a).is_none(), "checked out");
        assert!(reg.take(a).is_none());
        assert!(reg.restore(a, e));
        assert_eq!(reg.get::<Dummy>(a).map(|d| d.0), Some(5));
    }

    #[test]
    fn test_restore_after_deregister_drops() {
        let mut reg = EntityRegistry::new();
        let a = reg.register("a", Box::new(Dummy(5))).unwrap();
        let e = reg.take(a).unwrap();
        reg.deregister(a);
        assert!(!reg.restore(a, e));
        assert!(reg.is_empty());
    }
}
