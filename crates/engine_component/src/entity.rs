//! Entity identity and the component container.
//!
//! An [`Entity`] owns its components, a set of tags and hierarchy links
//! (stored as ids, never as owning pointers). An entity can be assembled
//! standalone and then handed to a kernel, which takes over index
//! maintenance for every later structural change.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::{Component, ComponentId, ComponentTypeId};

/// A unique entity identifier.
///
/// Server-created ids travel over the wire and are reused verbatim by
/// clients for their mirror entities, so they are random UUIDs rather than
/// allocator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Allocate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// A component together with its instance identity.
#[derive(Debug, Clone)]
pub struct ComponentSlot {
    id: ComponentId,
    component: Box<dyn Component>,
}

impl ComponentSlot {
    /// The component's instance identity.
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Borrow the component.
    #[must_use]
    pub fn component(&self) -> &dyn Component {
        self.component.as_ref()
    }

    /// Mutably borrow the component.
    pub fn component_mut(&mut self) -> &mut dyn Component {
        self.component.as_mut()
    }
}

/// An addressable container of components.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    name: String,
    prefab: Option<String>,
    components: Vec<ComponentSlot>,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    tags: BTreeSet<String>,
}

impl Entity {
    /// Create an empty entity with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(EntityId::new(), name)
    }

    /// Create an empty entity with a caller-chosen id.
    #[must_use]
    pub fn with_id(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            prefab: None,
            components: Vec::new(),
            parent: None,
            children: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Builder: attach a component.
    #[must_use]
    pub fn with_component(mut self, component: impl Component) -> Self {
        self.add_component(component);
        self
    }

    /// Builder: add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The prefab this entity was instantiated from, if any.
    #[must_use]
    pub fn prefab(&self) -> Option<&str> {
        self.prefab.as_deref()
    }

    pub fn set_prefab(&mut self, prefab: Option<String>) {
        self.prefab = prefab;
    }

    #[must_use]
    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    // ── Components ──────────────────────────────────────────────────────────

    /// Attach a component.
    ///
    /// Returns `false` and drops `component` when the entity already owns a
    /// component of the same runtime type; no hook fires in that case.
    pub fn add_component(&mut self, component: impl Component) -> bool {
        self.add_boxed(Box::new(component)).is_some()
    }

    /// Attach an already boxed component, returning its new identity.
    pub fn add_boxed(&mut self, mut component: Box<dyn Component>) -> Option<ComponentId> {
        let ty = component.dyn_type_id();
        if self.components.iter().any(|s| s.component.dyn_type_id() == ty) {
            return None;
        }
        component.on_added_to_entity(self.id);
        let id = ComponentId::new();
        self.components.push(ComponentSlot { id, component });
        Some(id)
    }

    /// Detach the component with the given instance id.
    pub fn remove_component(&mut self, id: ComponentId) -> Option<Box<dyn Component>> {
        let pos = self.components.iter().position(|s| s.id == id)?;
        let mut slot = self.components.remove(pos);
        slot.component.on_removed_from_entity(self.id);
        Some(slot.component)
    }

    /// Number of attached components.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Iterate over attached components in insertion order.
    pub fn slots(&self) -> impl Iterator<Item = &ComponentSlot> {
        self.components.iter()
    }

    /// Mutably iterate over attached components in insertion order.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut ComponentSlot> {
        self.components.iter_mut()
    }

    /// First component matching `ty` (covariantly).
    #[must_use]
    pub fn find(&self, ty: ComponentTypeId) -> Option<&ComponentSlot> {
        self.components.iter().find(|s| s.component.matches(ty))
    }

    /// Component with exactly this runtime type name.
    #[must_use]
    pub fn find_by_type_name(&self, name: &str) -> Option<&ComponentSlot> {
        self.components
            .iter()
            .find(|s| s.component.dyn_type_name() == name)
    }

    /// Mutable variant of [`Entity::find_by_type_name`].
    pub fn find_by_type_name_mut(&mut self, name: &str) -> Option<&mut ComponentSlot> {
        self.components
            .iter_mut()
            .find(|s| s.component.dyn_type_name() == name)
    }

    /// Component by instance id.
    #[must_use]
    pub fn slot(&self, id: ComponentId) -> Option<&ComponentSlot> {
        self.components.iter().find(|s| s.id == id)
    }

    /// Mutable component by instance id.
    pub fn slot_mut(&mut self, id: ComponentId) -> Option<&mut ComponentSlot> {
        self.components.iter_mut().find(|s| s.id == id)
    }

    /// Typed lookup by exact type.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.components
            .iter()
            .find_map(|s| s.component.downcast_ref::<T>())
    }

    /// Typed mutable lookup by exact type.
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|s| s.component.downcast_mut::<T>())
    }

    /// Match a filter: for every entry, the id of the first component that
    /// satisfies it, in filter order. `exclude` is treated as already
    /// detached.
    #[must_use]
    pub fn match_filter(
        &self,
        filter: &[ComponentTypeId],
        exclude: Option<ComponentId>,
    ) -> Option<Vec<ComponentId>> {
        filter
            .iter()
            .map(|&ty| {
                self.components
                    .iter()
                    .find(|s| Some(s.id) != exclude && s.component.matches(ty))
                    .map(|s| s.id)
            })
            .collect()
    }

    /// Run removal and destroy hooks on every component, leaving the entity
    /// empty.
    pub fn destroy_components(&mut self) {
        for mut slot in self.components.drain(..) {
            slot.component.on_removed_from_entity(self.id);
            slot.component.on_destroy();
        }
    }

    /// Clone this entity under a new id. Hierarchy links are not copied;
    /// components get fresh instance ids.
    #[must_use]
    pub fn clone_as(&self, id: EntityId) -> Entity {
        let mut entity = Entity::with_id(id, self.name.clone());
        entity.tags = self.tags.clone();
        for slot in &self.components {
            entity.add_boxed(slot.component.clone_component());
        }
        entity
    }

    // ── Tags ────────────────────────────────────────────────────────────────

    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    // ── Hierarchy links ─────────────────────────────────────────────────────
    //
    // Raw link setters. The kernel validates acyclicity before calling them.

    pub fn set_parent(&mut self, parent: Option<EntityId>) {
        self.parent = parent;
    }

    pub fn push_child(&mut self, child: EntityId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, child: EntityId) -> bool {
        let before = self.children.len();
        self.children.retain(|&c| c != child);
        before != self.children.len()
    }

    pub fn take_children(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.children)
    }
}
