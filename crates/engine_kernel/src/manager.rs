//! The scheduling kernel.
//!
//! [`EcsManager`] owns the [`World`], one [`Group`] per distinct filter and
//! every registered [`System`]. Structural changes keep the groups exact
//! incrementally: only the entity being changed is re-checked, and only
//! against existing groups.
//!
//! ## Frame lifecycle
//!
//! 1. Collect the started systems whose tick interval has elapsed.
//! 2. Resolve them against the dependency graph (see [`crate::scheduler`]).
//! 3. For each resolved system, dependencies first: call
//!    [`System::on_loop`], then apply the [`Commands`] it queued so later
//!    systems observe them.

use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use engine_component::{Component, ComponentId, Entity, EntityId, Filter};

use crate::config::KernelConfig;
use crate::context::{Command, Commands, SystemContext};
use crate::error::KernelError;
use crate::group::{Group, GroupRow};
use crate::registry::{SystemRegistry, SystemSlot};
use crate::scheduler::DependencyGraph;
use crate::system::{System, SystemId};
use crate::world::World;

/// The entity/component index and system loop.
pub struct EcsManager {
    config: KernelConfig,
    world: World,
    groups: Vec<Group>,
    systems: SystemRegistry,
    graph: DependencyGraph,
    running: bool,
}

impl Default for EcsManager {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl EcsManager {
    #[must_use]
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            world: World::new(),
            groups: Vec::new(),
            systems: SystemRegistry::new(),
            graph: DependencyGraph::new(),
            running: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Component data access. Structural changes go through the manager.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The group for `filter`, if any system declared it.
    #[must_use]
    pub fn group(&self, filter: &Filter) -> Option<&Group> {
        self.groups.iter().find(|g| g.filter() == filter)
    }

    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// The registered system of type `S`.
    #[must_use]
    pub fn system<S: System>(&self) -> Option<&S> {
        let slot = self.systems.get(SystemId::of::<S>())?;
        let system: &dyn System = slot.system.as_ref();
        system.as_any().downcast_ref::<S>()
    }

    /// Mutable access to the registered system of type `S`.
    pub fn system_mut<S: System>(&mut self) -> Option<&mut S> {
        let slot = self.systems.get_mut(SystemId::of::<S>())?;
        let system: &mut dyn System = slot.system.as_mut();
        system.as_any_mut().downcast_mut::<S>()
    }

    /// Scheduling state of a registered system.
    #[must_use]
    pub fn system_slot(&self, id: SystemId) -> Option<&SystemSlot> {
        self.systems.get(id)
    }

    // ── Entities ────────────────────────────────────────────────────────────

    /// Create and register an empty entity.
    pub fn create_entity(&mut self, name: impl Into<String>) -> EntityId {
        let entity = Entity::new(name);
        let id = entity.id();
        self.world.insert(entity);
        self.index_entity(id);
        id
    }

    /// Register a standalone entity and index it against every group.
    ///
    /// A parent link is kept when the parent is registered; child links are
    /// rebuilt through [`EcsManager::add_child`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DuplicateEntity`] if the id is taken.
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<EntityId, KernelError> {
        let id = entity.id();
        if self.world.contains(id) {
            return Err(KernelError::DuplicateEntity(id));
        }

        let parent = entity.parent();
        entity.set_parent(None);
        entity.take_children();
        self.world.insert(entity);

        if let Some(parent) = parent
            && self.world.contains(parent)
        {
            self.link(parent, id);
        }

        debug!(entity = %id, "entity added");
        self.index_entity(id);
        Ok(id)
    }

    /// Unregister an entity without destroying its components.
    ///
    /// Every group the entity belonged to notifies its systems first. The
    /// entity is detached from its parent; its children become roots.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown id.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Entity, KernelError> {
        if !self.world.contains(id) {
            return Err(KernelError::EntityNotFound(id));
        }
        self.unindex_entity(id);
        self.unlink_all(id);
        let entity = self
            .world
            .remove(id)
            .ok_or(KernelError::EntityNotFound(id))?;
        debug!(entity = %id, "entity removed");
        Ok(entity)
    }

    /// Unregister an entity and run removal and destroy hooks on each of its
    /// components.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown id.
    pub fn destroy_entity(&mut self, id: EntityId) -> Result<(), KernelError> {
        let mut entity = self.remove_entity(id)?;
        entity.destroy_components();
        debug!(entity = %id, "entity destroyed");
        Ok(())
    }

    // ── Components ──────────────────────────────────────────────────────────

    /// Attach a component. Returns `None` when the entity already holds a
    /// component of the same type.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown entity.
    pub fn add_component(
        &mut self,
        entity: EntityId,
        component: impl Component,
    ) -> Result<Option<ComponentId>, KernelError> {
        self.add_boxed(entity, Box::new(component))
    }

    /// Attach an already boxed component.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown entity.
    pub fn add_boxed(
        &mut self,
        id: EntityId,
        component: Box<dyn Component>,
    ) -> Result<Option<ComponentId>, KernelError> {
        let entity = self
            .world
            .entity_mut(id)
            .ok_or(KernelError::EntityNotFound(id))?;
        let type_name = component.dyn_type_name();
        let Some(component_id) = entity.add_boxed(component) else {
            debug!(entity = %id, component = type_name, "duplicate component type ignored");
            return Ok(None);
        };
        self.index_entity(id);
        Ok(Some(component_id))
    }

    /// Detach a component.
    ///
    /// Groups the entity leaves notify their systems while the component is
    /// still attached; the rows are dropped afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown entity.
    pub fn remove_component(
        &mut self,
        id: EntityId,
        component: ComponentId,
    ) -> Result<Option<Box<dyn Component>>, KernelError> {
        let Self {
            world,
            groups,
            systems,
            ..
        } = self;

        let entity = world.entity(id).ok_or(KernelError::EntityNotFound(id))?;
        if entity.slot(component).is_none() {
            return Ok(None);
        }

        let mut leaving = Vec::new();
        for (idx, group) in groups.iter_mut().enumerate() {
            let Some(row) = group.row(id) else {
                continue;
            };
            if !row.components.contains(&component) {
                continue;
            }
            match entity.match_filter(group.filter().types(), Some(component)) {
                Some(replacement) => group.update_row(id, replacement),
                None => {
                    let row = row.clone();
                    notify_ineligible(systems, world, group, &row);
                    leaving.push(idx);
                }
            }
        }

        let removed = world
            .entity_mut(id)
            .and_then(|e| e.remove_component(component));
        for idx in leaving {
            groups[idx].remove_row(id);
        }
        Ok(removed)
    }

    /// Detach the component of exact type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown entity.
    pub fn remove_component_by_type<T: Component>(
        &mut self,
        id: EntityId,
    ) -> Result<Option<Box<dyn Component>>, KernelError> {
        let entity = self
            .world
            .entity(id)
            .ok_or(KernelError::EntityNotFound(id))?;
        let ty = T::component_type_id();
        let Some(component) = entity
            .slots()
            .find(|s| s.component().dyn_type_id() == ty)
            .map(|s| s.id())
        else {
            return Ok(None);
        };
        self.remove_component(id, component)
    }

    // ── Hierarchy and tags ──────────────────────────────────────────────────

    /// Make `child` a child of `parent`, detaching it from any previous
    /// parent.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] if either entity is unknown,
    /// or [`KernelError::HierarchyCycle`] if `child` is `parent` or one of
    /// its ancestors.
    pub fn add_child(&mut self, parent: EntityId, child: EntityId) -> Result<(), KernelError> {
        for id in [parent, child] {
            if !self.world.contains(id) {
                return Err(KernelError::EntityNotFound(id));
            }
        }
        if self.world.is_ancestor_or_self(child, parent) {
            return Err(KernelError::HierarchyCycle { parent, child });
        }

        let previous = self.world.entity(child).and_then(Entity::parent);
        if previous == Some(parent) {
            return Ok(());
        }
        if let Some(previous) = previous
            && let Some(old) = self.world.entity_mut(previous)
        {
            old.remove_child(child);
        }
        self.link(parent, child);
        Ok(())
    }

    /// Detach `child` from `parent`. Returns `false` if it was not a child.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] if `child` is unknown.
    pub fn remove_child(&mut self, parent: EntityId, child: EntityId) -> Result<bool, KernelError> {
        let entity = self
            .world
            .entity_mut(child)
            .ok_or(KernelError::EntityNotFound(child))?;
        if entity.parent() != Some(parent) {
            return Ok(false);
        }
        entity.set_parent(None);
        if let Some(parent) = self.world.entity_mut(parent) {
            parent.remove_child(child);
        }
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown entity.
    pub fn add_tag(&mut self, id: EntityId, tag: impl Into<String>) -> Result<bool, KernelError> {
        self.world
            .entity_mut(id)
            .map(|e| e.add_tag(tag))
            .ok_or(KernelError::EntityNotFound(id))
    }

    /// # Errors
    ///
    /// Returns [`KernelError::EntityNotFound`] for an unknown entity.
    pub fn remove_tag(&mut self, id: EntityId, tag: &str) -> Result<bool, KernelError> {
        self.world
            .entity_mut(id)
            .map(|e| e.remove_tag(tag))
            .ok_or(KernelError::EntityNotFound(id))
    }

    #[must_use]
    pub fn has_tag(&self, id: EntityId, tag: &str) -> bool {
        self.world.has_tag(id, tag)
    }

    fn link(&mut self, parent: EntityId, child: EntityId) {
        if let Some(entity) = self.world.entity_mut(child) {
            entity.set_parent(Some(parent));
        }
        if let Some(entity) = self.world.entity_mut(parent) {
            entity.push_child(child);
        }
    }

    fn unlink_all(&mut self, id: EntityId) {
        let Some(entity) = self.world.entity_mut(id) else {
            return;
        };
        let parent = entity.parent();
        let children = entity.take_children();
        entity.set_parent(None);

        if let Some(parent) = parent.and_then(|p| self.world.entity_mut(p)) {
            parent.remove_child(id);
        }
        for child in children {
            if let Some(child) = self.world.entity_mut(child) {
                child.set_parent(None);
            }
        }
    }

    // ── Indexing ────────────────────────────────────────────────────────────

    /// Append the entity to every existing group it newly satisfies.
    fn index_entity(&mut self, id: EntityId) {
        let Self {
            world,
            groups,
            systems,
            ..
        } = self;
        let Some(entity) = world.entity(id) else {
            return;
        };
        for group in groups.iter_mut() {
            if group.contains(id) {
                continue;
            }
            if let Some(components) = entity.match_filter(group.filter().types(), None) {
                let row = GroupRow {
                    entity: id,
                    components,
                };
                group.push_row(row.clone());
                notify_eligible(systems, world, group, &row);
            }
        }
    }

    /// Drop the entity from every group, notifying first.
    fn unindex_entity(&mut self, id: EntityId) {
        let Self {
            world,
            groups,
            systems,
            ..
        } = self;
        for group in groups.iter_mut() {
            if let Some(row) = group.row(id).cloned() {
                notify_ineligible(systems, world, group, &row);
                group.remove_row(id);
            }
        }
    }

    // ── Systems ─────────────────────────────────────────────────────────────

    /// Register a system, creating or joining the group for its filter.
    ///
    /// The system is told about every entity already in its group. It is
    /// started by the next [`EcsManager::start`] (the running loop calls it
    /// every frame).
    ///
    /// # Errors
    ///
    /// - [`KernelError::InvalidTickRate`] unless the tick rate is positive.
    /// - [`KernelError::DuplicateSystem`] if a system of the same type is
    ///   registered.
    /// - [`KernelError::DependencyCycle`] if the declared dependencies would
    ///   close a cycle.
    pub fn add_system(&mut self, system: impl System) -> Result<SystemId, KernelError> {
        self.add_boxed_system(Box::new(system))
    }

    /// Boxed variant of [`EcsManager::add_system`].
    ///
    /// # Errors
    ///
    /// See [`EcsManager::add_system`].
    pub fn add_boxed_system(&mut self, system: Box<dyn System>) -> Result<SystemId, KernelError> {
        let id = system.id();
        let tick_rate = system.tick_rate();
        let interval =
            SystemSlot::interval_for(tick_rate).ok_or(KernelError::InvalidTickRate(tick_rate))?;
        if self.systems.contains(id) {
            return Err(KernelError::DuplicateSystem(id.name()));
        }
        let dependencies = system.dependencies();
        if let Some(cycle) = self.graph.find_cycle(id, &dependencies) {
            let cycle = cycle
                .iter()
                .map(SystemId::short_name)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(KernelError::DependencyCycle {
                system: id.name(),
                cycle,
            });
        }

        let slot = SystemSlot::new(system, interval);
        let filter = slot.filter().clone();
        self.graph.insert(id, dependencies);
        self.systems.push(slot);

        let group_idx = match self.groups.iter().position(|g| g.filter() == &filter) {
            Some(idx) => idx,
            None => {
                let mut group = Group::new(filter);
                for entity in self.world.iter() {
                    if let Some(components) = entity.match_filter(group.filter().types(), None) {
                        group.push_row(GroupRow {
                            entity: entity.id(),
                            components,
                        });
                    }
                }
                self.groups.push(group);
                self.groups.len() - 1
            }
        };

        let Self {
            world,
            groups,
            systems,
            ..
        } = self;
        let group = &mut groups[group_idx];
        group.subscribe(id);
        if let Some(slot) = systems.get_mut(id) {
            for row in group.rows() {
                slot.system.on_entity_eligible(world, row);
            }
        }

        info!(
            system = %id,
            tick_rate,
            filter_len = group.filter().len(),
            rows = group.len(),
            "system added"
        );
        Ok(id)
    }

    /// Remove the system of type `S`.
    ///
    /// # Errors
    ///
    /// See [`EcsManager::remove_system_by_id`].
    pub async fn remove_system<S: System>(&mut self) -> Result<(), KernelError> {
        self.remove_system_by_id(SystemId::of::<S>()).await
    }

    /// Remove a system: its group's entities are reported ineligible, the
    /// system is stopped if it was started, and the group is deleted when no
    /// other system uses it.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::SystemNotFound`] for an unknown system, or
    /// [`KernelError::Lifecycle`] if its `stop` hook fails (the system is
    /// removed regardless).
    pub async fn remove_system_by_id(&mut self, id: SystemId) -> Result<(), KernelError> {
        let mut slot = self
            .systems
            .remove(id)
            .ok_or(KernelError::SystemNotFound(id.name()))?;
        self.graph.remove(id);

        if let Some(idx) = self.groups.iter().position(|g| g.filter() == slot.filter()) {
            let group = &mut self.groups[idx];
            for row in group.rows() {
                slot.system.on_entity_ineligible(&self.world, row);
            }
            group.unsubscribe(id);
            if group.subscribers().is_empty() {
                self.groups.remove(idx);
            }
        }

        info!(system = %id, "system removed");
        if slot.started {
            slot.system
                .stop()
                .await
                .map_err(|e| KernelError::lifecycle(id.name(), "stop", &e))?;
        }
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start and initialize every system not yet started, and mark the
    /// kernel running.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NoGroups`] when there is nothing to drive, or
    /// [`KernelError::Lifecycle`] for the first failing hook.
    pub async fn start(&mut self) -> Result<(), KernelError> {
        if self.groups.is_empty() {
            return Err(KernelError::NoGroups);
        }
        self.start_pending().await?;
        if !self.running {
            self.running = true;
            info!(systems = self.systems.len(), groups = self.groups.len(), "kernel started");
        }
        Ok(())
    }

    async fn start_pending(&mut self) -> Result<(), KernelError> {
        for slot in self.systems.iter_mut().filter(|s| !s.started) {
            let name = slot.id.name();
            slot.system
                .start()
                .await
                .map_err(|e| KernelError::lifecycle(name, "start", &e))?;
            slot.system
                .initialize()
                .await
                .map_err(|e| KernelError::lifecycle(name, "initialize", &e))?;
            slot.started = true;
            info!(system = %slot.id, "system started");
        }
        Ok(())
    }

    /// Stop every started system and mark the kernel stopped.
    ///
    /// # Errors
    ///
    /// Every system is stopped; the first failure is returned.
    pub async fn stop(&mut self) -> Result<(), KernelError> {
        let mut first_error = None;
        for slot in self.systems.iter_mut().filter(|s| s.started) {
            slot.started = false;
            if let Err(e) = slot.system.stop().await {
                warn!(system = %slot.id, error = %e, "system failed to stop");
                first_error.get_or_insert(KernelError::lifecycle(slot.id.name(), "stop", &e));
            }
        }
        self.running = false;
        info!("kernel stopped");
        first_error.map_or(Ok(()), Err)
    }

    // ── Frame loop ──────────────────────────────────────────────────────────

    /// Run one frame now. See [`EcsManager::run_frame_at`].
    pub fn run_frame(&mut self) -> Vec<SystemId> {
        self.run_frame_at(Instant::now())
    }

    /// Run one frame as if the clock read `now`.
    ///
    /// Returns the systems that ran, in order. Nothing runs while the kernel
    /// is stopped.
    pub fn run_frame_at(&mut self, now: Instant) -> Vec<SystemId> {
        if !self.running {
            return Vec::new();
        }
        let due: HashSet<SystemId> = self
            .systems
            .iter()
            .filter(|s| s.is_due(now))
            .map(SystemSlot::id)
            .collect();
        let order = self.graph.resolve(&due);
        for &id in &order {
            self.run_system(id, now);
        }
        order
    }

    fn run_system(&mut self, id: SystemId, now: Instant) {
        let mut commands = Commands::new();
        {
            let Self {
                world,
                groups,
                systems,
                ..
            } = self;
            let Some(slot) = systems.get_mut(id) else {
                return;
            };
            let delta = slot
                .last_run
                .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
            slot.last_run = Some(now);
            let rows = groups
                .iter()
                .find(|g| g.filter() == slot.filter())
                .map_or(&[][..], Group::rows);

            let mut ctx = SystemContext {
                world,
                commands: &mut commands,
                rows,
                delta,
            };
            slot.system.on_loop(&mut ctx);
        }
        self.apply_commands(id, commands);
    }

    fn apply_commands(&mut self, issuer: SystemId, mut commands: Commands) {
        for command in commands.drain() {
            if let Err(e) = self.apply(command) {
                warn!(system = %issuer, error = %e, "command failed");
            }
        }
    }

    fn apply(&mut self, command: Command) -> Result<(), KernelError> {
        match command {
            Command::AddEntity(entity) => self.add_entity(entity).map(|_| ()),
            Command::RemoveEntity(id) => self.remove_entity(id).map(|_| ()),
            Command::DestroyEntity(id) => self.destroy_entity(id),
            Command::AddComponent(id, component) => self.add_boxed(id, component).map(|_| ()),
            Command::RemoveComponent(id, component) => {
                self.remove_component(id, component).map(|_| ())
            }
            Command::AddChild { parent, child } => self.add_child(parent, child),
            Command::RemoveChild { parent, child } => self.remove_child(parent, child).map(|_| ()),
        }
    }

    /// Drive frames at [`KernelConfig::frame_rate`] until `shutdown`
    /// resolves or [`KernelConfig::max_frames`] frames ran, then stop.
    ///
    /// Returns the number of frames run.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTickRate`] for a bad frame rate, and any
    /// error from [`EcsManager::start`] or [`EcsManager::stop`].
    pub async fn run<F>(&mut self, shutdown: F) -> Result<u64, KernelError>
    where
        F: Future<Output = ()>,
    {
        let period = self.config.frame_period()?;
        self.start().await?;

        info!(
            frame_rate = self.config.frame_rate,
            max_frames = self.config.max_frames,
            "starting frame loop"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut frames = 0u64;
        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(frames, "shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.start_pending().await?;
                    let started = Instant::now();
                    let ran = self.run_frame_at(started);
                    frames += 1;

                    let elapsed = started.elapsed();
                    if elapsed > period {
                        warn!(
                            frame = frames,
                            elapsed_ms = elapsed.as_millis() as u64,
                            budget_ms = period.as_millis() as u64,
                            "frame exceeded time budget"
                        );
                    } else {
                        debug!(frame = frames, systems = ran.len(), "frame complete");
                    }

                    if self.config.max_frames > 0 && frames >= self.config.max_frames {
                        info!(frames, "frame limit reached");
                        break;
                    }
                }
            }
        }

        self.stop().await?;
        Ok(frames)
    }
}

fn notify_eligible(systems: &mut SystemRegistry, world: &World, group: &Group, row: &GroupRow) {
    for &id in group.subscribers() {
        if let Some(slot) = systems.get_mut(id) {
            slot.system.on_entity_eligible(world, row);
        }
    }
}

fn notify_ineligible(systems: &mut SystemRegistry, world: &World, group: &Group, row: &GroupRow) {
    for &id in group.subscribers() {
        if let Some(slot) = systems.get_mut(id) {
            slot.system.on_entity_ineligible(world, row);
        }
    }
}
