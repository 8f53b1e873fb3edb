//! Per-frame execution context provided to [`System::on_loop`](crate::System::on_loop).

use std::time::Duration;

use engine_component::{Component, ComponentId, Entity, EntityId};

use crate::group::GroupRow;
use crate::world::World;

/// A deferred structural change.
///
/// Systems cannot reshape the world while the kernel iterates their group,
/// so structural changes are queued and applied, with full index
/// maintenance, right after the issuing system returns.
#[derive(Debug)]
pub enum Command {
    AddEntity(Entity),
    RemoveEntity(EntityId),
    DestroyEntity(EntityId),
    AddComponent(EntityId, Box<dyn Component>),
    RemoveComponent(EntityId, ComponentId),
    AddChild { parent: EntityId, child: EntityId },
    RemoveChild { parent: EntityId, child: EntityId },
}

/// A queue of [`Command`]s.
#[derive(Debug, Default)]
pub struct Commands {
    queue: Vec<Command>,
}

impl Commands {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fully assembled entity for insertion.
    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        let id = entity.id();
        self.queue.push(Command::AddEntity(entity));
        id
    }

    /// Queue an empty entity and return its id.
    pub fn create_entity(&mut self, name: impl Into<String>) -> EntityId {
        self.add_entity(Entity::new(name))
    }

    /// Unregister an entity without destroying its components.
    pub fn remove_entity(&mut self, entity: EntityId) {
        self.queue.push(Command::RemoveEntity(entity));
    }

    /// Unregister an entity and destroy its components.
    pub fn destroy_entity(&mut self, entity: EntityId) {
        self.queue.push(Command::DestroyEntity(entity));
    }

    pub fn add_component(&mut self, entity: EntityId, component: impl Component) {
        self.add_boxed(entity, Box::new(component));
    }

    pub fn add_boxed(&mut self, entity: EntityId, component: Box<dyn Component>) {
        self.queue.push(Command::AddComponent(entity, component));
    }

    pub fn remove_component(&mut self, entity: EntityId, component: ComponentId) {
        self.queue.push(Command::RemoveComponent(entity, component));
    }

    pub fn add_child(&mut self, parent: EntityId, child: EntityId) {
        self.queue.push(Command::AddChild { parent, child });
    }

    pub fn remove_child(&mut self, parent: EntityId, child: EntityId) {
        self.queue.push(Command::RemoveChild { parent, child });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.queue)
    }
}

/// Context provided to a system on each of its ticks.
pub struct SystemContext<'a> {
    /// Component data of every registered entity.
    pub world: &'a mut World,
    /// Structural changes to apply after this system returns.
    pub commands: &'a mut Commands,
    /// The system's group, in eligibility order.
    pub rows: &'a [GroupRow],
    /// Time since this system last ran; zero on its first run.
    pub delta: Duration,
}

impl SystemContext<'_> {
    /// [`SystemContext::delta`] in seconds.
    #[must_use]
    pub fn dt(&self) -> f64 {
        self.delta.as_secs_f64()
    }

    /// Ids of the entities in the system's group.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.rows.iter().map(|r| r.entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_queue_in_order() {
        let mut commands = Commands::new();
        let a = commands.create_entity("a");
        commands.destroy_entity(a);
        assert_eq!(commands.len(), 2);

        let drained = commands.drain();
        assert!(matches!(&drained[0], Command::AddEntity(e) if e.id() == a));
        assert!(matches!(drained[1], Command::DestroyEntity(id) if id == a));
        assert!(commands.is_empty());
    }

    #[test]
    fn test_context_dt() {
        let mut world = World::new();
        let mut commands = Commands::new();
        let ctx = SystemContext {
            world: &mut world,
            commands: &mut commands,
            rows: &[],
            delta: Duration::from_millis(250),
        };
        assert!((ctx.dt() - 0.25).abs() < f64::EPSILON);
        assert_eq!(ctx.entities().count(), 0);
    }
}
