//! The authoritative side of replication.
//!
//! [`ServerNetworkSystem`] owns every client connection. Transport tasks
//! report connects and disconnects over an unbounded channel and park each
//! client's latest snapshot in the shared [`ServerHub`]; the system applies
//! both on its own tick, then broadcasts what changed.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use engine_component::{ClientId, Entity, EntityId, Filter, Networked, Timestamp};
use engine_kernel::{Commands, GroupRow, System, SystemContext, World};

use crate::codec::{Frame, encode_frame};
use crate::config::NetConfig;
use crate::registry::ComponentRegistry;
use crate::replication::{ApplyRole, ReplicationTracker, apply_entity};
use crate::snapshot::{CustomData, GameState};
use crate::transport;

/// A change in the set of connected clients.
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected {
        client: ClientId,
        outbound: mpsc::UnboundedSender<Frame>,
    },
    Disconnected {
        client: ClientId,
    },
}

/// State shared between the server system and its transport tasks.
#[derive(Debug)]
pub struct ServerHub {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    pending: DashMap<ClientId, GameState>,
}

impl ServerHub {
    /// A hub and the receiving end of its connection events.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let hub = Self {
            events,
            pending: DashMap::new(),
        };
        (Arc::new(hub), rx)
    }

    /// Register a new connection. Returns its id and the channel the server
    /// system will send its frames on.
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<Frame>) {
        let client = ClientId::new();
        let (outbound, rx) = mpsc::unbounded_channel();
        if self
            .events
            .send(ConnectionEvent::Connected { client, outbound })
            .is_err()
        {
            debug!(%client, "server system gone, connection ignored");
        }
        (client, rx)
    }

    /// Report a closed connection.
    pub fn disconnect(&self, client: ClientId) {
        self.pending.remove(&client);
        if self.events.send(ConnectionEvent::Disconnected { client }).is_err() {
            debug!(%client, "server system gone, disconnect ignored");
        }
    }

    /// Park a received snapshot until the next tick. Returns `false`, and
    /// drops `state`, if one is already waiting.
    pub fn deliver(&self, client: ClientId, state: GameState) -> bool {
        match self.pending.entry(client) {
            Entry::Occupied(_) => {
                warn!(%client, "snapshot already pending, dropping the newer one");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    /// Take the snapshot waiting for `client`, if any.
    pub fn take(&self, client: ClientId) -> Option<GameState> {
        self.pending.remove(&client).map(|(_, state)| state)
    }

    /// Number of clients with a snapshot waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Application callbacks of the server system.
pub trait ServerHooks: Send + 'static {
    /// Queue the entity representing a newly connected client.
    ///
    /// Defaults to an entity named `Player` carrying a [`Networked`] marker
    /// owned by `client`.
    fn create_player(&mut self, client: ClientId, commands: &mut Commands) -> Option<EntityId> {
        let player = Entity::new("Player").with_component(Networked::owned_by(client));
        Some(commands.add_entity(player))
    }

    /// A client disconnected. Defaults to destroying its player entity.
    fn on_disconnect(&mut self, _client: ClientId, player: Option<EntityId>, commands: &mut Commands) {
        if let Some(player) = player {
            commands.destroy_entity(player);
        }
    }

    /// Application custom data received from `client`.
    fn on_custom_data(
        &mut self,
        _client: ClientId,
        _data: &CustomData,
        _world: &mut World,
        _commands: &mut Commands,
    ) {
    }
}

/// The default [`ServerHooks`].
#[derive(Debug, Default)]
pub struct DefaultServerHooks;

impl ServerHooks for DefaultServerHooks {}

/// Per-connection server state.
#[derive(Debug)]
pub struct ClientHandler {
    client: ClientId,
    player: Option<EntityId>,
    outbound: mpsc::UnboundedSender<Frame>,
    custom_data: Vec<CustomData>,
    force_full_update: bool,
}

impl ClientHandler {
    #[must_use]
    pub fn client(&self) -> ClientId {
        self.client
    }

    #[must_use]
    pub fn player(&self) -> Option<EntityId> {
        self.player
    }

    /// Whether the next send is a full snapshot.
    #[must_use]
    pub fn needs_full_update(&self) -> bool {
        self.force_full_update
    }
}

/// Replicates every [`Networked`] entity to all connected clients and
/// applies their authorized writes.
pub struct ServerNetworkSystem {
    config: NetConfig,
    registry: ComponentRegistry,
    fingerprint: String,
    hooks: Box<dyn ServerHooks>,
    hub: Arc<ServerHub>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    clients: Vec<ClientHandler>,
    tracker: ReplicationTracker,
    broadcast: Vec<CustomData>,
    listen: bool,
    local_addr: Option<SocketAddr>,
    listener: Option<JoinHandle<()>>,
}

impl ServerNetworkSystem {
    /// A server that listens on [`NetConfig::listen_addr`] once started.
    #[must_use]
    pub fn new(config: NetConfig, registry: ComponentRegistry) -> Self {
        let (hub, events) = ServerHub::new();
        Self {
            fingerprint: registry.fingerprint(),
            config,
            registry,
            hooks: Box::new(DefaultServerHooks),
            hub,
            events,
            clients: Vec::new(),
            tracker: ReplicationTracker::new(),
            broadcast: Vec::new(),
            listen: true,
            local_addr: None,
            listener: None,
        }
    }

    /// A server without a socket; connections are driven through
    /// [`ServerNetworkSystem::hub`].
    #[must_use]
    pub fn manual(config: NetConfig, registry: ComponentRegistry) -> Self {
        Self {
            listen: false,
            ..Self::new(config, registry)
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: impl ServerHooks) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn tracker(&self) -> &ReplicationTracker {
        &self.tracker
    }

    /// The shared hub transport tasks report into.
    #[must_use]
    pub fn hub(&self) -> Arc<ServerHub> {
        Arc::clone(&self.hub)
    }

    /// The bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connected clients, in connection order.
    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.iter().map(|h| h.client)
    }

    #[must_use]
    pub fn handler(&self, client: ClientId) -> Option<&ClientHandler> {
        self.clients.iter().find(|h| h.client == client)
    }

    /// The player entity created for `client`.
    #[must_use]
    pub fn player_of(&self, client: ClientId) -> Option<EntityId> {
        self.handler(client).and_then(|h| h.player)
    }

    /// Queue custom data for every client on the next tick.
    pub fn broadcast_custom(&mut self, data: CustomData) {
        self.broadcast.push(data);
    }

    /// Queue custom data for one client. Returns `false` for unknown clients.
    pub fn send_custom(&mut self, client: ClientId, data: CustomData) -> bool {
        match self.clients.iter_mut().find(|h| h.client == client) {
            Some(handler) => {
                handler.custom_data.push(data);
                true
            }
            None => false,
        }
    }

    /// Send `client` the full retained snapshot on the next tick.
    pub fn request_full_update(&mut self, client: ClientId) -> bool {
        match self.clients.iter_mut().find(|h| h.client == client) {
            Some(handler) => {
                handler.force_full_update = true;
                true
            }
            None => false,
        }
    }

    fn drain_events(&mut self, commands: &mut Commands) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ConnectionEvent::Connected { client, outbound } => {
                    let player = self.hooks.create_player(client, commands);
                    info!(%client, ?player, "client joined");
                    self.clients.push(ClientHandler {
                        client,
                        player,
                        outbound,
                        custom_data: Vec::new(),
                        force_full_update: true,
                    });
                }
                ConnectionEvent::Disconnected { client } => {
                    let Some(index) = self.clients.iter().position(|h| h.client == client) else {
                        continue;
                    };
                    let handler = self.clients.remove(index);
                    self.hub.take(client);
                    self.hooks.on_disconnect(client, handler.player, commands);
                    info!(%client, "client left");
                }
            }
        }
    }

    fn apply_pending(&mut self, world: &mut World, commands: &mut Commands) {
        for handler in &mut self.clients {
            let Some(state) = self.hub.take(handler.client) else {
                continue;
            };
            let sender = handler.client;

            for (id, incoming) in &state.entities {
                match world.slots_mut(*id) {
                    Some(slots) => {
                        apply_entity(
                            slots,
                            incoming,
                            &self.registry,
                            ApplyRole::Server { sender },
                            &mut self.tracker,
                        );
                    }
                    None => debug!(client = %sender, entity = %id, "update for unknown entity ignored"),
                }
            }

            for custom in &state.custom_data {
                if custom.is_resync() {
                    debug!(client = %sender, "client requested a full snapshot");
                    handler.force_full_update = true;
                } else if !custom.is_reserved() {
                    self.hooks.on_custom_data(sender, custom, world, commands);
                }
            }
        }
    }

    fn build_delta(&mut self, world: &mut World, rows: &[GroupRow], now: Timestamp) -> GameState {
        let mut delta = GameState::new(now);
        for notice in self.tracker.flush_destroyed() {
            delta.push_entity(notice);
        }
        for row in rows {
            if let Some(record) = self.tracker.serialize_entity(world, row.entity, &self.registry, now) {
                self.tracker.merge(&record);
                delta.push_entity(record);
            }
        }
        delta
    }

    fn send(&mut self, delta: &GameState, now: Timestamp) {
        let broadcast = std::mem::take(&mut self.broadcast);
        let full = self
            .clients
            .iter()
            .any(|h| h.force_full_update)
            .then(|| self.tracker.snapshot(now));

        for handler in &mut self.clients {
            let mut custom = broadcast.clone();
            custom.append(&mut handler.custom_data);

            let mut state = match &full {
                Some(full) if handler.force_full_update => {
                    custom.insert(0, CustomData::identity(handler.client, &self.fingerprint));
                    let mut state = full.visible_to(handler.client);
                    // Notices flushed this tick are no longer retained.
                    for (_, notice) in delta.entities.iter().filter(|(_, e)| e.destroyed) {
                        state.push_entity(notice.clone());
                    }
                    state
                }
                _ if !delta.entities.is_empty() || !custom.is_empty() => delta.visible_to(handler.client),
                _ => continue,
            };
            state.custom_data = custom;

            match encode_frame(&state, self.config.wire_format) {
                Ok(frame) => {
                    if handler.outbound.send(frame).is_err() {
                        debug!(client = %handler.client, "outbound channel closed");
                    }
                }
                Err(err) => warn!(client = %handler.client, error = %err, "failed to encode snapshot"),
            }
            handler.force_full_update = false;
        }
    }
}

#[async_trait]
impl System for ServerNetworkSystem {
    fn filter(&self) -> Filter {
        Filter::new().with::<Networked>()
    }

    fn tick_rate(&self) -> f64 {
        self.config.tick_rate
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        self.config.validate()?;
        if self.listen {
            let listener = transport::bind(self.config.listen_addr()).await?;
            let addr = listener.local_addr()?;
            self.local_addr = Some(addr);
            self.listener = Some(transport::spawn_server(listener, Arc::clone(&self.hub)));
            info!(%addr, format = %self.config.wire_format, "server listening");
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.clients.clear();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        info!("server stopped");
        Ok(())
    }

    fn on_entity_ineligible(&mut self, _world: &World, row: &GroupRow) {
        self.tracker.mark_destroyed(row.entity);
        for handler in &mut self.clients {
            if handler.player == Some(row.entity) {
                handler.player = None;
            }
        }
    }

    fn on_loop(&mut self, ctx: &mut SystemContext<'_>) {
        let now = Timestamp::now();
        self.drain_events(ctx.commands);
        self.apply_pending(ctx.world, ctx.commands);
        let delta = self.build_delta(ctx.world, ctx.rows, now);
        self.send(&delta, now);
    }
}
