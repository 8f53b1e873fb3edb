//! Named entity templates.
//!
//! A [`PrefabRegistry`] is an explicit object owned by whoever instantiates
//! entities from names (the client network system materializes server
//! entities through one). There is no process-wide registry.

use std::collections::HashMap;

use crate::entity::{Entity, EntityId};

/// A set of named entity templates.
#[derive(Debug, Clone, Default)]
pub struct PrefabRegistry {
    prefabs: HashMap<String, Entity>,
}

impl PrefabRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `template` under `name`, replacing any previous template.
    pub fn register(&mut self, name: impl Into<String>, template: Entity) {
        self.prefabs.insert(name.into(), template);
    }

    /// Builder variant of [`PrefabRegistry::register`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, template: Entity) -> Self {
        self.register(name, template);
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.prefabs.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }

    /// Instantiate `name` under a fresh id.
    #[must_use]
    pub fn instantiate(&self, name: &str) -> Option<Entity> {
        self.instantiate_as(name, EntityId::new())
    }

    /// Instantiate `name` under a caller-chosen id. The instance remembers
    /// which prefab it came from.
    #[must_use]
    pub fn instantiate_as(&self, name: &str, id: EntityId) -> Option<Entity> {
        let template = self.prefabs.get(name)?;
        let mut entity = template.clone_as(id);
        entity.set_prefab(Some(name.to_string()));
        Some(entity)
    }
}
