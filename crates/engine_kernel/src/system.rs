//! The [`System`] trait and system identity.
//!
//! A system declares a [`Filter`], a tick rate and the system types it
//! depends on. The kernel keeps the system's group up to date and calls
//! [`System::on_loop`] whenever the system is due and its dependencies are
//! resolvable. Lifecycle hooks are async because they may open sockets or
//! spawn tasks; the per-frame body is synchronous and never yields.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use engine_component::Filter;

use crate::context::SystemContext;
use crate::group::GroupRow;
use crate::world::World;

/// Identity of a system: its Rust type.
#[derive(Clone, Copy)]
pub struct SystemId {
    type_id: TypeId,
    name: &'static str,
}

impl SystemId {
    /// The id of system type `S`.
    #[must_use]
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: type_name::<S>(),
        }
    }

    /// The type name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The type name without its module path.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for SystemId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for SystemId {}

impl Hash for SystemId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Upcast to [`Any`] so the kernel can hand out typed system references.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A unit of per-frame logic over the entities matching its filter.
///
/// # Examples
///
/// ```rust
/// use engine_component::Filter;
/// use engine_kernel::{System, SystemContext};
///
/// struct Heartbeat {
///     beats: u64,
/// }
///
/// impl System for Heartbeat {
///     fn filter(&self) -> Filter {
///         Filter::new()
///     }
///
///     fn tick_rate(&self) -> f64 {
///         1.0
///     }
///
///     fn on_loop(&mut self, _ctx: &mut SystemContext<'_>) {
///         self.beats += 1;
///     }
/// }
/// ```
#[async_trait]
pub trait System: AsAny + Send + 'static {
    /// The components an entity must carry to be processed by this system.
    fn filter(&self) -> Filter;

    /// Ticks per second. `f64::INFINITY` means every frame.
    fn tick_rate(&self) -> f64 {
        f64::INFINITY
    }

    /// System types that must be due and resolvable for this one to run.
    fn dependencies(&self) -> Vec<SystemId> {
        Vec::new()
    }

    /// This system's identity.
    fn id(&self) -> SystemId {
        SystemId::of::<Self>()
    }

    /// Async setup, e.g. binding a socket.
    ///
    /// # Errors
    ///
    /// Any error aborts [`EcsManager::start`](crate::EcsManager::start).
    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after [`System::start`] succeeded.
    ///
    /// # Errors
    ///
    /// Any error aborts [`EcsManager::start`](crate::EcsManager::start).
    async fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Async teardown.
    ///
    /// # Errors
    ///
    /// Reported by [`EcsManager::stop`](crate::EcsManager::stop) after every
    /// other system was stopped.
    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// An entity started matching the filter.
    fn on_entity_eligible(&mut self, _world: &World, _row: &GroupRow) {}

    /// An entity is about to stop matching the filter. Its components are
    /// still attached and readable through `world`.
    fn on_entity_ineligible(&mut self, _world: &World, _row: &GroupRow) {}

    /// The per-frame body.
    fn on_loop(&mut self, ctx: &mut SystemContext<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn test_system_id_is_type_identity() {
        assert_eq!(SystemId::of::<Alpha>(), SystemId::of::<Alpha>());
        assert_ne!(SystemId::of::<Alpha>(), SystemId::of::<Beta>());
        assert_eq!(SystemId::of::<Alpha>().short_name(), "Alpha");
    }
}
