//! Entity storage owned by the kernel.
//!
//! The [`World`] holds every registered entity keyed by id, in insertion
//! order. Outside the kernel it only hands out component *data*: structural
//! changes (adding or removing entities and components, reparenting) go
//! through [`EcsManager`](crate::EcsManager) or a
//! [`Commands`](crate::Commands) buffer so the group index stays exact.

use std::collections::HashMap;

use engine_component::{Component, ComponentId, ComponentSlot, Entity, EntityId};

/// The entity arena.
#[derive(Debug, Default)]
pub struct World {
    entities: HashMap<EntityId, Entity>,
    order: Vec<EntityId>,
}

impl World {
    /// Create a new empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entities in the world.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Iterate over entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Entity ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[EntityId] {
        &self.order
    }

    /// Typed component lookup.
    #[must_use]
    pub fn get<T: Component>(&self, id: EntityId) -> Option<&T> {
        self.entities.get(&id)?.get::<T>()
    }

    /// Typed mutable component lookup.
    pub fn get_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        self.entities.get_mut(&id)?.get_mut::<T>()
    }

    /// Component slot by instance id.
    #[must_use]
    pub fn slot(&self, id: EntityId, component: ComponentId) -> Option<&ComponentSlot> {
        self.entities.get(&id)?.slot(component)
    }

    /// Mutable component slot by instance id.
    pub fn slot_mut(&mut self, id: EntityId, component: ComponentId) -> Option<&mut ComponentSlot> {
        self.entities.get_mut(&id)?.slot_mut(component)
    }

    /// Mutable component slot by exact runtime type name.
    pub fn slot_by_type_name_mut(&mut self, id: EntityId, name: &str) -> Option<&mut ComponentSlot> {
        self.entities.get_mut(&id)?.find_by_type_name_mut(name)
    }

    /// Mutably iterate over an entity's component slots.
    pub fn slots_mut(&mut self, id: EntityId) -> Option<impl Iterator<Item = &mut ComponentSlot>> {
        self.entities.get_mut(&id).map(Entity::slots_mut)
    }

    /// Entities carrying `tag`, in insertion order.
    pub fn find_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.iter().filter(move |e| e.has_tag(tag))
    }

    /// First entity named `name`, in insertion order.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Entity> {
        self.iter().find(|e| e.name() == name)
    }

    /// Add a tag. Tags do not affect group membership.
    pub fn add_tag(&mut self, id: EntityId, tag: impl Into<String>) -> bool {
        self.entities
            .get_mut(&id)
            .is_some_and(|e| e.add_tag(tag))
    }

    pub fn remove_tag(&mut self, id: EntityId, tag: &str) -> bool {
        self.entities
            .get_mut(&id)
            .is_some_and(|e| e.remove_tag(tag))
    }

    #[must_use]
    pub fn has_tag(&self, id: EntityId, tag: &str) -> bool {
        self.entities.get(&id).is_some_and(|e| e.has_tag(tag))
    }

    pub fn set_name(&mut self, id: EntityId, name: impl Into<String>) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.set_name(name);
                true
            }
            None => false,
        }
    }

    // ── Kernel-only structural access ───────────────────────────────────────

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Insert an entity. The caller has already checked for a duplicate id.
    pub(crate) fn insert(&mut self, entity: Entity) {
        let id = entity.id();
        self.order.push(id);
        self.entities.insert(id, entity);
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.order.retain(|&e| e != id);
        Some(entity)
    }

    /// Returns `true` if `ancestor` is `id` or one of its ancestors.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.entities.get(&current).and_then(Entity::parent);
        }
        false
    }
}
