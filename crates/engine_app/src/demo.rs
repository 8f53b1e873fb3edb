//! The demo world both modes run.
//!
//! The server owns a `Clock` entity whose [`Counter`] ticks once a second and
//! gives every connected client an `Avatar` with a client-owned
//! [`Transform3D`]. Clients drift their own avatar in a circle and log the
//! counters they mirror.

use std::collections::HashMap;

use engine_component::{
    ClientId, Component, Entity, EntityId, Filter, NetworkComponent, NetworkState, Networked, ReadError, Scope,
    SerializableComponent, read_payload, write_payload,
};
use engine_kernel::{Commands, System, SystemContext, SystemId, World};
use engine_math::{Transform3D, Vec3};
use engine_net::{ClientHooks, ClientNetworkSystem, ComponentRegistry, CustomData, ServerHooks};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Tag carried by the entities this client drives.
pub const LOCAL_TAG: &str = "local";

// ── Counter ─────────────────────────────────────────────────────

/// A server-owned replicated counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counter {
    pub value: u64,
    #[serde(skip)]
    pub net: NetworkState,
}

impl Component for Counter {
    fn type_name() -> &'static str {
        "Counter"
    }

    fn as_serializable(&self) -> Option<&dyn SerializableComponent> {
        Some(self)
    }

    fn as_serializable_mut(&mut self) -> Option<&mut dyn SerializableComponent> {
        Some(self)
    }

    fn as_network(&self) -> Option<&dyn NetworkComponent> {
        Some(self)
    }

    fn as_network_mut(&mut self) -> Option<&mut dyn NetworkComponent> {
        Some(self)
    }
}

impl SerializableComponent for Counter {
    fn write(&self) -> Value {
        write_payload(self)
    }

    fn read(&mut self, data: &Value) -> Result<(), ReadError> {
        let incoming: Counter = read_payload(data)?;
        self.value = incoming.value;
        Ok(())
    }
}

impl NetworkComponent for Counter {
    fn network_state(&self) -> &NetworkState {
        &self.net
    }

    fn network_state_mut(&mut self) -> &mut NetworkState {
        &mut self.net
    }
}

/// Components both sides agree to replicate.
#[must_use]
pub fn registry() -> ComponentRegistry {
    ComponentRegistry::new().with::<Counter>().with::<Transform3D>()
}

/// The server's replicated clock entity.
#[must_use]
pub fn clock() -> Entity {
    Entity::new("Clock")
        .with_component(Networked::new())
        .with_component(Counter::default())
}

// ── Server side ─────────────────────────────────────────────────

/// Bumps every [`Counter`] once a second.
#[derive(Debug, Default)]
pub struct CounterSystem;

impl System for CounterSystem {
    fn filter(&self) -> Filter {
        Filter::new().with::<Counter>()
    }

    fn tick_rate(&self) -> f64 {
        1.0
    }

    fn on_loop(&mut self, ctx: &mut SystemContext<'_>) {
        for row in ctx.rows {
            if let Some(counter) = ctx.world.get_mut::<Counter>(row.entity) {
                counter.value += 1;
                debug!(entity = %row.entity, value = counter.value, "counter ticked");
            }
        }
    }
}

/// Where avatars appear: the start of [`DriftSystem`]'s circle.
pub const AVATAR_SPAWN: Vec3 = Vec3::new(5.0, 0.0, 0.0);

/// Spawns an `Avatar` per client whose transform the client drives.
#[derive(Debug, Default)]
pub struct Avatars;

impl ServerHooks for Avatars {
    fn create_player(&mut self, client: ClientId, commands: &mut Commands) -> Option<EntityId> {
        let avatar = Entity::new("Avatar")
            .with_component(Networked::owned_by(client))
            .with_component(
                Transform3D::from_position(AVATAR_SPAWN).with_network(NetworkState::owned_by(client, Scope::Public)),
            );
        let id = commands.add_entity(avatar);
        info!(%client, avatar = %id, "avatar spawned");
        Some(id)
    }

    fn on_custom_data(&mut self, client: ClientId, data: &CustomData, _world: &mut World, _commands: &mut Commands) {
        info!(%client, kind = data.kind().unwrap_or("-"), "custom data received");
    }
}

// ── Client side ─────────────────────────────────────────────────

/// Tags the entities owned by this client so [`DriftSystem`] can find them.
#[derive(Debug, Default)]
pub struct DemoClientHooks {
    me: Option<ClientId>,
}

impl DemoClientHooks {
    #[must_use]
    pub fn me(&self) -> Option<ClientId> {
        self.me
    }
}

impl ClientHooks for DemoClientHooks {
    fn on_connect(&mut self) {
        info!("connected to server");
    }

    fn on_disconnect(&mut self) {
        info!("disconnected from server");
        self.me = None;
    }

    fn on_identity(&mut self, client: ClientId) {
        info!(%client, "server assigned identity");
        self.me = Some(client);
    }

    fn on_new_entity(&mut self, entity: &mut Entity) {
        let owner = entity.get::<Networked>().and_then(|marker| marker.owner());
        if owner.is_some() && owner == self.me {
            entity.add_tag(LOCAL_TAG);
            info!(entity = %entity.id(), name = entity.name(), "taking control of entity");
        }
    }

    fn on_custom_data(&mut self, data: &CustomData, _world: &mut World, _commands: &mut Commands) {
        info!(kind = data.kind().unwrap_or("-"), "custom data received");
    }
}

/// Moves locally controlled transforms around a circle.
#[derive(Debug)]
pub struct DriftSystem {
    radius: f32,
    /// Radians per second.
    speed: f32,
    phase: f32,
}

impl Default for DriftSystem {
    fn default() -> Self {
        Self {
            radius: 5.0,
            speed: 1.0,
            phase: 0.0,
        }
    }
}

impl System for DriftSystem {
    fn filter(&self) -> Filter {
        Filter::new().with::<Transform3D>()
    }

    fn tick_rate(&self) -> f64 {
        10.0
    }

    fn on_loop(&mut self, ctx: &mut SystemContext<'_>) {
        self.phase += ctx.dt() as f32 * self.speed;
        let target = Vec3::new(self.phase.cos(), 0.0, self.phase.sin()) * self.radius;
        for row in ctx.rows {
            if !ctx.world.has_tag(row.entity, LOCAL_TAG) {
                continue;
            }
            if let Some(transform) = ctx.world.get_mut::<Transform3D>(row.entity) {
                transform.position = target;
            }
        }
    }
}

/// Logs mirrored counters once a second, after the network system applied
/// the latest snapshot.
#[derive(Debug, Default)]
pub struct WatchSystem {
    seen: HashMap<EntityId, u64>,
}

impl WatchSystem {
    /// The last value observed for `entity`.
    #[must_use]
    pub fn seen(&self, entity: EntityId) -> Option<u64> {
        self.seen.get(&entity).copied()
    }
}

impl System for WatchSystem {
    fn filter(&self) -> Filter {
        Filter::new().with::<Counter>()
    }

    fn tick_rate(&self) -> f64 {
        1.0
    }

    fn dependencies(&self) -> Vec<SystemId> {
        vec![SystemId::of::<ClientNetworkSystem>()]
    }

    fn on_loop(&mut self, ctx: &mut SystemContext<'_>) {
        self.seen.retain(|id, _| ctx.world.contains(*id));
        for row in ctx.rows {
            if let Some(counter) = ctx.world.get::<Counter>(row.entity) {
                info!(entity = %row.entity, value = counter.value, "counter");
                self.seen.insert(row.entity, counter.value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use engine_kernel::{EcsManager, KernelConfig};
    use engine_net::{NetConfig, ServerNetworkSystem};

    use super::*;

    #[tokio::test]
    async fn test_counter_ticks() {
        let mut manager = EcsManager::new(KernelConfig::new());
        manager.add_system(CounterSystem).unwrap();
        let clock = manager.add_entity(clock()).unwrap();
        manager.start().await.unwrap();

        manager.run_frame();
        assert_eq!(manager.world().get::<Counter>(clock).unwrap().value, 1);

        // Not due again within the same second.
        manager.run_frame();
        assert_eq!(manager.world().get::<Counter>(clock).unwrap().value, 1);
    }

    #[test]
    fn test_hooks_tag_owned_entities() {
        let me = ClientId::new();
        let mut hooks = DemoClientHooks::default();

        let mut early = Entity::new("Avatar").with_component(Networked::owned_by(me));
        hooks.on_new_entity(&mut early);
        assert!(!early.has_tag(LOCAL_TAG));

        hooks.on_identity(me);
        assert_eq!(hooks.me(), Some(me));

        let mut mine = Entity::new("Avatar").with_component(Networked::owned_by(me));
        let mut theirs = Entity::new("Avatar").with_component(Networked::owned_by(ClientId::new()));
        let mut shared = Entity::new("Clock").with_component(Networked::new());
        hooks.on_new_entity(&mut mine);
        hooks.on_new_entity(&mut theirs);
        hooks.on_new_entity(&mut shared);
        assert!(mine.has_tag(LOCAL_TAG));
        assert!(!theirs.has_tag(LOCAL_TAG));
        assert!(!shared.has_tag(LOCAL_TAG));
    }

    #[tokio::test]
    async fn test_avatar_spawns_owned_by_its_client() {
        let server = ServerNetworkSystem::manual(NetConfig::new(), registry()).with_hooks(Avatars);
        let hub = server.hub();
        let mut manager = EcsManager::new(KernelConfig::new());
        manager.add_system(server).unwrap();
        manager.start().await.unwrap();

        let (client, _frames) = hub.connect();
        manager.run_frame();
        let avatar = manager.system::<ServerNetworkSystem>().unwrap().player_of(client).unwrap();
        let transform = manager.world().get::<Transform3D>(avatar).unwrap();
        assert_eq!(transform.position, AVATAR_SPAWN);
        assert_eq!(transform.owner(), Some(client));
        assert_eq!(manager.world().get::<Networked>(avatar).unwrap().owner(), Some(client));
    }

    #[tokio::test]
    async fn test_drift_moves_local_transforms_only() {
        let mut manager = EcsManager::new(KernelConfig::new());
        manager.add_system(DriftSystem::default()).unwrap();
        let local = manager
            .add_entity(Entity::new("Mine").with_component(Transform3D::IDENTITY).with_tag(LOCAL_TAG))
            .unwrap();
        let remote = manager
            .add_entity(Entity::new("Theirs").with_component(Transform3D::IDENTITY))
            .unwrap();
        manager.start().await.unwrap();

        manager.run_frame();
        assert_eq!(manager.world().get::<Transform3D>(local).unwrap().position, AVATAR_SPAWN);
        assert_eq!(manager.world().get::<Transform3D>(remote).unwrap().position, Vec3::ZERO);
    }

    #[tokio::test]
    async fn test_watch_runs_after_client_network() {
        let (network, _frames) = ClientNetworkSystem::manual(NetConfig::new(), registry());
        let mut manager = EcsManager::new(KernelConfig::new());
        manager.add_system(WatchSystem::default()).unwrap();
        manager.add_system(network).unwrap();
        let clock = manager.add_entity(clock()).unwrap();
        manager.start().await.unwrap();

        let ran = manager.run_frame();
        assert_eq!(ran, vec![SystemId::of::<ClientNetworkSystem>(), SystemId::of::<WatchSystem>()]);
        assert_eq!(manager.system::<WatchSystem>().unwrap().seen(clock), Some(0));
    }

    #[test]
    fn test_registry_lists_demo_components() {
        let registry = registry();
        assert!(registry.contains("Counter"));
        assert!(registry.contains("Transform3D"));
        assert!(registry.contains("Networked"));
    }
}
