//! Groups: the incremental index from a filter to its eligible entities.

use engine_component::{ComponentId, EntityId, Filter};

use crate::system::SystemId;

/// One eligible entity and its matched components, in filter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRow {
    pub entity: EntityId,
    pub components: Vec<ComponentId>,
}

/// Every entity eligible for a filter, plus the systems subscribed to it.
#[derive(Debug, Clone)]
pub struct Group {
    filter: Filter,
    rows: Vec<GroupRow>,
    subscribers: Vec<SystemId>,
}

impl Group {
    pub(crate) fn new(filter: Filter) -> Self {
        Self {
            filter,
            rows: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Eligible entities in the order they became eligible.
    #[must_use]
    pub fn rows(&self) -> &[GroupRow] {
        &self.rows
    }

    #[must_use]
    pub fn subscribers(&self) -> &[SystemId] {
        &self.subscribers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.rows.iter().any(|r| r.entity == entity)
    }

    #[must_use]
    pub fn row(&self, entity: EntityId) -> Option<&GroupRow> {
        self.rows.iter().find(|r| r.entity == entity)
    }

    pub(crate) fn push_row(&mut self, row: GroupRow) {
        self.rows.push(row);
    }

    pub(crate) fn remove_row(&mut self, entity: EntityId) -> Option<GroupRow> {
        let pos = self.rows.iter().position(|r| r.entity == entity)?;
        Some(self.rows.remove(pos))
    }

    /// Replace the tuple of an entity that stays eligible.
    pub(crate) fn update_row(&mut self, entity: EntityId, components: Vec<ComponentId>) {
        if let Some(row) = self.rows.iter_mut().find(|r| r.entity == entity) {
            row.components = components;
        }
    }

    pub(crate) fn subscribe(&mut self, system: SystemId) {
        if !self.subscribers.contains(&system) {
            self.subscribers.push(system);
        }
    }

    pub(crate) fn unsubscribe(&mut self, system: SystemId) {
        self.subscribers.retain(|&s| s != system);
    }
}
