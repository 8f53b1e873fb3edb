//! Kernel error types.

use engine_component::EntityId;

/// Errors returned by [`EcsManager`](crate::EcsManager) operations.
///
/// Every variant is a programmer error in the embedding code: the call is
/// refused and the kernel is left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// An entity with this id is already registered.
    #[error("entity {0} is already registered")]
    DuplicateEntity(EntityId),

    /// No entity with this id is registered.
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    /// The loop was started with no group to drive.
    #[error("no groups registered; add a system before starting the kernel")]
    NoGroups,

    /// A system of this type is already registered.
    #[error("system {0} is already registered")]
    DuplicateSystem(&'static str),

    /// No system of this type is registered.
    #[error("system {0} not found")]
    SystemNotFound(&'static str),

    /// Registering the system would close a dependency cycle.
    #[error("registering {system} would close a dependency cycle: {cycle}")]
    DependencyCycle {
        /// The rejected system.
        system: &'static str,
        /// The cycle, rendered as `A -> B -> A`.
        cycle: String,
    },

    /// Parenting `child` under `parent` would make an entity its own ancestor.
    #[error("cannot parent {child} under {parent}: hierarchy would contain a cycle")]
    HierarchyCycle {
        parent: EntityId,
        child: EntityId,
    },

    /// Tick and frame rates must be positive.
    #[error("invalid rate {0}: must be greater than zero")]
    InvalidTickRate(f64),

    /// A system's async lifecycle hook failed.
    #[error("system {system} failed to {phase}: {message}")]
    Lifecycle {
        system: &'static str,
        phase: &'static str,
        message: String,
    },
}

impl KernelError {
    pub(crate) fn lifecycle(system: &'static str, phase: &'static str, err: &anyhow::Error) -> Self {
        Self::Lifecycle {
            system,
            phase,
            message: format!("{err:#}"),
        }
    }
}
