//! Filters: the component requirements a system declares.
//!
//! A [`Filter`] is an **ordered** list of component types. The kernel keeps
//! one group per distinct filter, and a system receives the matched
//! components of each entity positionally, in filter order.

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;

/// An ordered list of required component types.
///
/// Two filters with the same types in a different order are distinct: they
/// produce differently-ordered component tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    types: Vec<ComponentTypeId>,
}

impl Filter {
    /// Create an empty filter. Every entity satisfies it.
    #[must_use]
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Append a required component type.
    #[must_use]
    pub fn with<T: Component>(self) -> Self {
        self.with_id(T::component_type_id())
    }

    /// Append a required component type by id.
    #[must_use]
    pub fn with_id(mut self, type_id: ComponentTypeId) -> Self {
        self.types.push(type_id);
        self
    }

    /// The required types, in order.
    #[must_use]
    pub fn types(&self) -> &[ComponentTypeId] {
        &self.types
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Returns `true` if `entity` owns a matching component for every entry.
    #[must_use]
    pub fn is_satisfied_by(&self, entity: &Entity) -> bool {
        entity.match_filter(&self.types, None).is_some()
    }
}

impl FromIterator<ComponentTypeId> for Filter {
    fn from_iter<I: IntoIterator<Item = ComponentTypeId>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Velocity;

    impl Component for Velocity {
        fn type_name() -> &'static str {
            "Velocity"
        }
    }

    #[derive(Debug, Clone)]
    struct Health;

    impl Component for Health {
        fn type_name() -> &'static str {
            "Health"
        }
    }

    #[test]
    fn test_order_matters_for_identity() {
        let a = Filter::new().with::<Velocity>().with::<Health>();
        let b = Filter::new().with::<Health>().with::<Velocity>();
        assert_ne!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let entity = Entity::new("bare");
        assert!(Filter::new().is_satisfied_by(&entity));
    }

    #[test]
    fn test_is_satisfied_by() {
        let filter = Filter::new().with::<Velocity>().with::<Health>();
        let partial = Entity::new("p").with_component(Velocity);
        let full = Entity::new("f")
            .with_component(Health)
            .with_component(Velocity);

        assert!(!filter.is_satisfied_by(&partial));
        assert!(filter.is_satisfied_by(&full));
    }

    #[test]
    fn test_from_iterator() {
        let filter: Filter = [ComponentTypeId(1), ComponentTypeId(2)].into_iter().collect();
        assert_eq!(filter.types(), &[ComponentTypeId(1), ComponentTypeId(2)]);
    }
}
