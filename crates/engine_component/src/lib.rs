//! # engine_component
//!
//! The shared primitives of the runtime: what a component is, how entities
//! hold them, and the contracts a component signs to leave the process.
//!
//! This crate provides:
//!
//! - [`Component`] trait with lifecycle hooks and covariant type matching.
//! - [`Entity`] — a component container with tags and hierarchy links.
//! - [`Filter`] — the ordered component requirements of a system.
//! - [`SerializableComponent`] — the `write`/`read` payload contract.
//! - [`NetworkComponent`] — ownership, scope, dirty detection and
//!   authorization for replicated components, plus the [`Networked`] marker.
//! - [`PrefabRegistry`] — named entity templates.

pub mod component;
pub mod entity;
pub mod filter;
pub mod network;
pub mod prefab;
pub mod serializable;

pub use component::{Component, ComponentId, ComponentTypeId, ErasedComponent};
pub use entity::{ComponentSlot, Entity, EntityId};
pub use filter::Filter;
pub use network::{ClientId, NetworkComponent, NetworkState, Networked, Scope, Timestamp};
pub use prefab::PrefabRegistry;
pub use serializable::{ComponentRecord, ReadError, SerializableComponent, read_payload, write_payload};
