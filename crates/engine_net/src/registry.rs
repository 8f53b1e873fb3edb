//! Allow-list of replicable component types.
//!
//! Incoming component names are untrusted. A name is only ever resolved
//! through a [`ComponentRegistry`]; anything outside it is rejected with
//! [`UnknownComponent`] and never instantiated.

use std::fmt;

use engine_component::{Component, ComponentTypeId, NetworkComponent, Networked};

/// Constructor for a blank component of a registered kind.
pub type ComponentFactory = fn() -> Box<dyn Component>;

fn create<T: NetworkComponent + Default>() -> Box<dyn Component> {
    Box::new(T::default())
}

/// One registered component type.
#[derive(Clone, Copy)]
pub struct ComponentKind {
    name: &'static str,
    type_id: ComponentTypeId,
    factory: ComponentFactory,
}

impl ComponentKind {
    /// The kind for component type `T`.
    #[must_use]
    pub fn of<T: NetworkComponent + Default>() -> Self {
        Self {
            name: T::type_name(),
            type_id: T::component_type_id(),
            factory: create::<T>,
        }
    }

    /// The wire class name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn type_id(&self) -> ComponentTypeId {
        self.type_id
    }

    /// A default-constructed instance.
    #[must_use]
    pub fn create(&self) -> Box<dyn Component> {
        (self.factory)()
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentKind")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

/// A component name that is not in the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown component `{0}`")]
pub struct UnknownComponent(pub String);

/// The set of component types that may be replicated.
///
/// [`Networked`] is always registered.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    kinds: Vec<ComponentKind>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kinds: vec![ComponentKind::of::<Networked>()],
        }
    }

    /// Register `T`. Registering the same type twice is a no-op.
    pub fn register<T: NetworkComponent + Default>(&mut self) -> &mut Self {
        let kind = ComponentKind::of::<T>();
        if !self.contains_type(kind.type_id) {
            self.kinds.push(kind);
        }
        self
    }

    /// Builder form of [`ComponentRegistry::register`].
    #[must_use]
    pub fn with<T: NetworkComponent + Default>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Look up a kind by its wire class name.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownComponent`] for names outside the allow-list.
    pub fn resolve(&self, name: &str) -> Result<&ComponentKind, UnknownComponent> {
        self.kinds
            .iter()
            .find(|kind| kind.name == name)
            .ok_or_else(|| UnknownComponent(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.iter().any(|kind| kind.name == name)
    }

    #[must_use]
    pub fn contains_type(&self, type_id: ComponentTypeId) -> bool {
        self.kinds.iter().any(|kind| kind.type_id == type_id)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().map(|kind| kind.name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// An order-independent digest of the registered names, exchanged so
    /// peers can detect mismatched allow-lists.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        format!("{:016x}", ComponentTypeId::from_name(&names.join(",")).0)
    }
}

#[cfg(test)]
mod tests {
    use engine_component::{NetworkState, ReadError, SerializableComponent};
    use serde_json::Value;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Beacon {
        net: NetworkState,
    }

    impl Component for Beacon {
        fn type_name() -> &'static str {
            "Beacon"
        }
    }

    impl SerializableComponent for Beacon {
        fn write(&self) -> Value {
            Value::Null
        }

        fn read(&mut self, _data: &Value) -> Result<(), ReadError> {
            Ok(())
        }
    }

    impl NetworkComponent for Beacon {
        fn network_state(&self) -> &NetworkState {
            &self.net
        }

        fn network_state_mut(&mut self) -> &mut NetworkState {
            &mut self.net
        }
    }

    #[test]
    fn test_networked_is_always_registered() {
        let registry = ComponentRegistry::new();
        assert!(registry.contains("Networked"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_and_create() {
        let registry = ComponentRegistry::new().with::<Beacon>().with::<Beacon>();
        assert_eq!(registry.len(), 2);
        let kind = registry.resolve("Beacon").unwrap();
        assert_eq!(kind.create().dyn_type_name(), "Beacon");
        assert_eq!(
            registry.resolve("Exploit").unwrap_err(),
            UnknownComponent("Exploit".to_string())
        );
    }

    #[test]
    fn test_fingerprint_ignores_registration_order() {
        let a = ComponentRegistry::new().with::<Beacon>();
        let mut b = ComponentRegistry::new();
        b.register::<Beacon>();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), ComponentRegistry::new().fingerprint());
    }
}
