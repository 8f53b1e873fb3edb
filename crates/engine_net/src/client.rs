//! The mirroring side of replication.
//!
//! [`ClientNetworkSystem`] applies server snapshots to a local mirror of
//! the world and sends back the state of the entities this client owns.
//! Its transport task parks at most one snapshot in a [`ClientLink`]; a
//! snapshot arriving while one is still waiting is dropped, and the system
//! asks the server for a full resync on its next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use engine_component::{
    ClientId, Component, Entity, EntityId, Filter, NetworkComponent, Networked, PrefabRegistry, Timestamp,
};
use engine_kernel::{Commands, GroupRow, System, SystemContext, World};

use crate::codec::{Frame, encode_frame};
use crate::config::NetConfig;
use crate::registry::ComponentRegistry;
use crate::replication::{ApplyRole, ComponentOutcome, ReplicationTracker, apply_entity, materialize};
use crate::snapshot::{CustomData, GameState, NetworkEntity};
use crate::transport;

/// Where the client stands with its server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Single-slot inbox shared between the client system and its transport
/// task.
#[derive(Debug, Default)]
pub struct ClientLink {
    inbound: Mutex<Option<GameState>>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl ClientLink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Park a snapshot until the next tick. Returns `false`, and counts a
    /// drop, if one is already waiting.
    pub fn deliver(&self, state: GameState) -> bool {
        let mut slot = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("snapshot already pending, dropping the newer one");
            return false;
        }
        *slot = Some(state);
        true
    }

    /// Take the waiting snapshot, if any.
    pub fn take(&self) -> Option<GameState> {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Mark the socket closed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshots dropped since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

/// Application callbacks of the client system.
pub trait ClientHooks: Send + 'static {
    fn on_connect(&mut self) {}

    fn on_disconnect(&mut self) {}

    /// The server assigned this client's id. Runs before the entities of
    /// the same snapshot are mirrored.
    fn on_identity(&mut self, _client: ClientId) {}

    /// A server entity is about to be mirrored locally. Runs before the
    /// entity is added, so components attached here are indexed with it.
    fn on_new_entity(&mut self, _entity: &mut Entity) {}

    /// Application custom data received from the server.
    fn on_custom_data(&mut self, _data: &CustomData, _world: &mut World, _commands: &mut Commands) {}
}

/// The default [`ClientHooks`].
#[derive(Debug, Default)]
pub struct DefaultClientHooks;

impl ClientHooks for DefaultClientHooks {}

/// Mirrors the server's [`Networked`] entities and replicates the ones
/// this client owns.
pub struct ClientNetworkSystem {
    config: NetConfig,
    registry: ComponentRegistry,
    fingerprint: String,
    prefabs: PrefabRegistry,
    hooks: Box<dyn ClientHooks>,
    state: ConnectionState,
    link: Arc<ClientLink>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Frame>>,
    connect: bool,
    client_id: Option<ClientId>,
    tracker: ReplicationTracker,
    custom_queue: Vec<CustomData>,
    transport: Option<JoinHandle<()>>,
}

impl ClientNetworkSystem {
    /// A client that connects to [`NetConfig::server_url`] once started.
    #[must_use]
    pub fn new(config: NetConfig, registry: ComponentRegistry) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            fingerprint: registry.fingerprint(),
            config,
            registry,
            prefabs: PrefabRegistry::new(),
            hooks: Box::new(DefaultClientHooks),
            state: ConnectionState::Disconnected,
            link: ClientLink::new(),
            outbound: Some(outbound),
            outbound_rx: Some(outbound_rx),
            connect: true,
            client_id: None,
            tracker: ReplicationTracker::new(),
            custom_queue: Vec::new(),
            transport: None,
        }
    }

    /// A client without a socket: snapshots are delivered through
    /// [`ClientNetworkSystem::link`] and outgoing frames appear on the
    /// returned receiver.
    #[must_use]
    pub fn manual(config: NetConfig, registry: ComponentRegistry) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let system = Self {
            state: ConnectionState::Connecting,
            outbound: Some(outbound),
            outbound_rx: None,
            connect: false,
            ..Self::new(config, registry)
        };
        (system, frames)
    }

    /// Prefabs used to materialize entities the server names one for.
    #[must_use]
    pub fn with_prefabs(mut self, prefabs: PrefabRegistry) -> Self {
        self.prefabs = prefabs;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: impl ClientHooks) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The id assigned by the server, once its identity record arrived.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// The inbox the transport task delivers into.
    #[must_use]
    pub fn link(&self) -> Arc<ClientLink> {
        Arc::clone(&self.link)
    }

    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Queue custom data for the server on the next tick.
    pub fn send_custom(&mut self, data: CustomData) {
        self.custom_queue.push(data);
    }

    /// Ask the server for a full snapshot on the next tick.
    pub fn request_resync(&mut self) {
        if !self.custom_queue.iter().any(CustomData::is_resync) {
            self.custom_queue.push(CustomData::resync());
        }
    }

    fn disconnect(&mut self) {
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;
        self.outbound = None;
        if was_connected {
            info!("connection to server lost");
            self.hooks.on_disconnect();
        }
    }

    /// Apply one server snapshot. A snapshot carrying an identity record is
    /// a full snapshot: mirrors it does not list are destroyed.
    fn apply_snapshot(&mut self, state: GameState, world: &mut World, commands: &mut Commands, rows: &[GroupRow]) {
        let mut full = false;
        for custom in &state.custom_data {
            if let Some((client, fingerprint)) = custom.as_identity() {
                full = true;
                if self.client_id != Some(client) {
                    info!(%client, "identity assigned by server");
                    self.client_id = Some(client);
                    self.hooks.on_identity(client);
                }
                if let Some(theirs) = fingerprint
                    && theirs != self.fingerprint
                {
                    warn!(server = theirs, client = %self.fingerprint, "component registries differ");
                }
            }
        }

        for (id, incoming) in &state.entities {
            self.apply_entity(*id, incoming, world, commands);
        }

        if full {
            for row in rows {
                if state.entity(row.entity).is_none() {
                    debug!(entity = %row.entity, "mirror missing from full snapshot, destroying");
                    commands.destroy_entity(row.entity);
                    self.tracker.forget(row.entity);
                }
            }
        }

        for custom in &state.custom_data {
            if !custom.is_reserved() {
                self.hooks.on_custom_data(custom, world, commands);
            }
        }
    }

    fn apply_entity(&mut self, id: EntityId, incoming: &NetworkEntity, world: &mut World, commands: &mut Commands) {
        if incoming.destroyed {
            if world.contains(id) {
                debug!(entity = %id, "server destroyed entity");
                commands.destroy_entity(id);
            }
            self.tracker.forget(id);
            return;
        }

        if world.contains(id) {
            let Some(slots) = world.slots_mut(id) else {
                return;
            };
            let outcomes = apply_entity(slots, incoming, &self.registry, ApplyRole::Client, &mut self.tracker);
            for (name, outcome) in outcomes {
                if outcome == ComponentOutcome::Missing
                    && let Some(component) = self.materialize(id, &name, incoming)
                {
                    commands.add_boxed(id, component);
                }
            }
            if let Some(name) = &incoming.name {
                world.set_name(id, name.clone());
            }
            return;
        }

        let mut entity = incoming
            .prefab_name
            .as_deref()
            .and_then(|prefab| {
                let entity = self.prefabs.instantiate_as(prefab, id);
                if entity.is_none() {
                    warn!(entity = %id, prefab, "unknown prefab, mirroring as a bare entity");
                }
                entity
            })
            .unwrap_or_else(|| Entity::with_id(id, ""));
        if let Some(name) = &incoming.name {
            entity.set_name(name.clone());
        }

        let outcomes = apply_entity(
            entity.slots_mut(),
            incoming,
            &self.registry,
            ApplyRole::Client,
            &mut self.tracker,
        );
        for (name, outcome) in outcomes {
            if outcome == ComponentOutcome::Missing
                && let Some(component) = self.materialize(id, &name, incoming)
            {
                entity.add_boxed(component);
            }
        }

        self.hooks.on_new_entity(&mut entity);
        debug!(entity = %id, name = entity.name(), "mirroring new entity");
        commands.add_entity(entity);
    }

    fn materialize(&mut self, id: EntityId, name: &str, incoming: &NetworkEntity) -> Option<Box<dyn Component>> {
        let record = incoming.component(name)?;
        let kind = self.registry.resolve(name).ok()?;
        let (component, synced) = materialize(kind, record)?;
        self.tracker.record_received(id, name, synced);
        Some(component)
    }

    fn send_owned(&mut self, world: &mut World, rows: &[GroupRow]) {
        let now = Timestamp::now();
        let mut delta = GameState::new(now);

        if let Some(me) = self.client_id {
            for row in rows {
                let owned = world
                    .get::<Networked>(row.entity)
                    .is_some_and(|marker| marker.owner() == Some(me));
                if !owned {
                    continue;
                }
                if let Some(record) = self.tracker.serialize_entity(world, row.entity, &self.registry, now) {
                    self.tracker.merge(&record);
                    delta.push_entity(record);
                }
            }
        }
        delta.custom_data = std::mem::take(&mut self.custom_queue);
        if delta.is_empty() {
            return;
        }

        let Some(outbound) = &self.outbound else {
            return;
        };
        match encode_frame(&delta, self.config.wire_format) {
            Ok(frame) => {
                if outbound.send(frame).is_err() {
                    debug!("outbound channel closed");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode snapshot"),
        }
    }
}

#[async_trait]
impl System for ClientNetworkSystem {
    fn filter(&self) -> Filter {
        Filter::new().with::<Networked>()
    }

    fn tick_rate(&self) -> f64 {
        self.config.tick_rate
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        self.config.validate()?;
        if !self.connect {
            return Ok(());
        }
        let Some(outbound_rx) = self.outbound_rx.take() else {
            anyhow::bail!("client transport already started");
        };
        self.state = ConnectionState::Connecting;
        match transport::connect(&self.config.server_url, self.link(), outbound_rx).await {
            Ok(task) => {
                self.transport = Some(task);
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                Err(err.into())
            }
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.disconnect();
        if let Some(mut task) = self.transport.take()
            && tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err()
        {
            task.abort();
        }
        info!("client stopped");
        Ok(())
    }

    fn on_entity_ineligible(&mut self, _world: &World, row: &GroupRow) {
        self.tracker.forget(row.entity);
    }

    fn on_loop(&mut self, ctx: &mut SystemContext<'_>) {
        match self.state {
            ConnectionState::Disconnected => return,
            ConnectionState::Connecting if !self.link.is_closed() => {
                self.state = ConnectionState::Connected;
                info!("connected");
                self.hooks.on_connect();
            }
            _ => {}
        }

        if self.link.is_closed() {
            self.disconnect();
            return;
        }

        let dropped = self.link.take_dropped();
        if dropped > 0 {
            warn!(dropped, "server snapshots dropped, requesting a full snapshot");
            self.request_resync();
        }

        if let Some(state) = self.link.take() {
            self.apply_snapshot(state, ctx.world, ctx.commands, ctx.rows);
        }

        self.send_owned(ctx.world, ctx.rows);
    }
}
