//! Core [`Component`] trait and associated identity types.
//!
//! Every piece of data attached to an entity implements [`Component`].
//! Components are stored type-erased (`Box<dyn Component>`) inside their
//! owning [`Entity`](crate::Entity), so the trait is object-safe: the
//! static type name lives behind `where Self: Sized`, and the erased
//! accessors come from the blanket [`ErasedComponent`] impl.
//!
//! ## Polyglot Type Identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash algorithm. This is deterministic and
//! language-neutral: any peer can compute the same ID for a given name.
//!
//! ## Covariant Matching
//!
//! Rust has no inheritance, so a component declares the types it may stand
//! in for through [`Component::supertypes`]. A filter entry naming a
//! supertype is satisfied by any component listing it.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;
use crate::network::NetworkComponent;
use crate::serializable::SerializableComponent;

/// A unique identifier for a component type, derived from its string name
/// using the FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a component's string name using
    /// the FNV-1a 64-bit hash algorithm.
    ///
    /// # Algorithm (FNV-1a 64-bit)
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Compute the [`ComponentTypeId`] for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::from_name(T::type_name())
    }
}

/// Opaque per-instance component identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub Uuid);

impl ComponentId {
    /// Allocate a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.0)
    }
}

/// The core component trait.
///
/// Implementors must be `Clone` so the blanket [`ErasedComponent`] impl can
/// clone them out of prefabs.
///
/// # Examples
///
/// ```rust
/// use engine_component::Component;
///
/// #[derive(Debug, Clone)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component: ErasedComponent + Send + Sync + fmt::Debug + 'static {
    /// A human-readable name for this component type. Also the class name
    /// used on the wire.
    fn type_name() -> &'static str
    where
        Self: Sized;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId
    where
        Self: Sized,
    {
        ComponentTypeId::from_name(Self::type_name())
    }

    /// Types this component can stand in for when matched against a filter.
    ///
    /// Must list every ancestor, not only the direct parent.
    fn supertypes(&self) -> &[ComponentTypeId] {
        &[]
    }

    /// Called once when the component is attached to `entity`.
    fn on_added_to_entity(&mut self, _entity: EntityId) {}

    /// Called when the component is detached from `entity`.
    fn on_removed_from_entity(&mut self, _entity: EntityId) {}

    /// Called when the owning entity is destroyed.
    fn on_destroy(&mut self) {}

    /// Serialization view, if this component implements
    /// [`SerializableComponent`].
    fn as_serializable(&self) -> Option<&dyn SerializableComponent> {
        None
    }

    /// Mutable serialization view.
    fn as_serializable_mut(&mut self) -> Option<&mut dyn SerializableComponent> {
        None
    }

    /// Network view, if this component implements [`NetworkComponent`].
    fn as_network(&self) -> Option<&dyn NetworkComponent> {
        None
    }

    /// Mutable network view.
    fn as_network_mut(&mut self) -> Option<&mut dyn NetworkComponent> {
        None
    }
}

/// Type-erased accessors implemented for every `Component + Clone`.
pub trait ErasedComponent {
    /// Upcast to [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast to [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Clone into a new box.
    fn clone_component(&self) -> Box<dyn Component>;

    /// The runtime type name.
    fn dyn_type_name(&self) -> &'static str;

    /// The runtime [`ComponentTypeId`].
    fn dyn_type_id(&self) -> ComponentTypeId;
}

impl<T: Component + Clone> ErasedComponent for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_component(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn dyn_type_name(&self) -> &'static str {
        T::type_name()
    }

    fn dyn_type_id(&self) -> ComponentTypeId {
        T::component_type_id()
    }
}

impl dyn Component {
    /// Returns `true` if this component satisfies a filter entry for `ty`:
    /// its own type is `ty`, or `ty` is one of its declared supertypes.
    #[must_use]
    pub fn matches(&self, ty: ComponentTypeId) -> bool {
        self.dyn_type_id() == ty || self.supertypes().contains(&ty)
    }

    /// Downcast to a concrete component type.
    #[must_use]
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to a concrete component type.
    #[must_use]
    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

impl Clone for Box<dyn Component> {
    fn clone(&self) -> Self {
        self.clone_component()
    }
}
