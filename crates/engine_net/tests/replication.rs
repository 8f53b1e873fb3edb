//! Server and client systems driven through their in-process hubs.

use std::sync::{Arc, Mutex};

use engine_component::{
    ClientId, Component, Entity, EntityId, NetworkComponent, NetworkState, Networked, PrefabRegistry,
    ReadError, Scope, SerializableComponent, Timestamp, read_payload, write_payload,
};
use engine_kernel::{Commands, EcsManager, KernelConfig, World};
use engine_net::{
    ClientHooks, ClientNetworkSystem, ComponentRegistry, ConnectionState, CustomData, Frame, GameState,
    NetConfig, NetworkEntity, SerializedComponent, ServerHooks, ServerNetworkSystem, decode_frame,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ── Components ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Score {
    points: u32,
    #[serde(skip)]
    net: NetworkState,
}

impl Score {
    fn owned(points: u32, owner: ClientId, scope: Scope) -> Self {
        Self {
            points,
            net: NetworkState::owned_by(owner, scope),
        }
    }
}

impl Component for Score {
    fn type_name() -> &'static str {
        "Score"
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

impl SerializableComponent for Score {
    fn write(&self) -> Value {
        write_payload(self)
    }

    fn read(&mut self, data: &Value) -> Result<(), ReadError> {
        let incoming: Score = read_payload(data)?;
        self.points = incoming.points;
        Ok(())
    }
}

impl NetworkComponent for Score {
    fn network_state(&self) -> &NetworkState {
        &self.net
    }

    fn network_state_mut(&mut self) -> &mut NetworkState {
        &mut self.net
    }
}

fn registry() -> ComponentRegistry {
    ComponentRegistry::new().with::<Score>()
}

fn config() -> NetConfig {
    NetConfig::new().with_tick_rate(f64::INFINITY)
}

fn next_state(frames: &mut mpsc::UnboundedReceiver<Frame>) -> Option<GameState> {
    frames.try_recv().ok().map(|frame| decode_frame(&frame).unwrap())
}

fn score_record(points: u32, at: u64) -> SerializedComponent {
    SerializedComponent {
        update_timestamp: Some(Timestamp::from_millis(at)),
        ..SerializedComponent::new(json!({ "points": points }))
    }
}

fn client_update(entity: EntityId, component: &str, record: SerializedComponent) -> GameState {
    let mut record_entity = NetworkEntity::new(entity);
    record_entity.upsert_component(component, record);
    let mut state = GameState::new(Timestamp::now());
    state.push_entity(record_entity);
    state
}

// ── Server ──────────────────────────────────────────────────────────────────

struct RecordingServerHooks {
    log: Log,
}

impl ServerHooks for RecordingServerHooks {
    fn on_custom_data(&mut self, client: ClientId, data: &CustomData, _world: &mut World, _commands: &mut Commands) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{client}:{}", data.kind().unwrap_or_default()));
    }
}

async fn server() -> (EcsManager, Arc<engine_net::ServerHub>, Log) {
    let log = Log::default();
    let system = ServerNetworkSystem::manual(config(), registry())
        .with_hooks(RecordingServerHooks { log: Arc::clone(&log) });
    let hub = system.hub();
    let mut manager = EcsManager::new(KernelConfig::new());
    manager.add_system(system).unwrap();
    manager.start().await.unwrap();
    (manager, hub, log)
}

fn server_system(manager: &EcsManager) -> &ServerNetworkSystem {
    manager.system::<ServerNetworkSystem>().unwrap()
}

#[tokio::test]
async fn test_new_client_gets_full_snapshot_then_its_player() {
    let (mut manager, hub, _log) = server().await;
    let crate_id = manager
        .add_entity(
            Entity::new("Crate")
                .with_component(Networked::new())
                .with_component(Score { points: 1, ..Score::default() }),
        )
        .unwrap();
    let (client, mut frames) = hub.connect();

    manager.run_frame();
    let first = next_state(&mut frames).unwrap();
    let crate_record = first.entity(crate_id).unwrap();
    assert_eq!(crate_record.name.as_deref(), Some("Crate"));
    assert_eq!(crate_record.component("Score").unwrap().data, json!({ "points": 1 }));
    let identity = first.custom_data[0].as_identity().unwrap();
    assert_eq!(identity.0, client);
    assert_eq!(identity.1, Some(registry().fingerprint().as_str()));

    let player = server_system(&manager).player_of(client).unwrap();
    assert!(manager.world().contains(player));

    manager.run_frame();
    let second = next_state(&mut frames).unwrap();
    assert!(second.entity(crate_id).is_none());
    let marker = second.entity(player).unwrap().component("Networked").unwrap();
    assert_eq!(marker.owner_id, Some(client));
    assert!(second.custom_data.is_empty());

    manager.run_frame();
    assert!(next_state(&mut frames).is_none());
}

#[tokio::test]
async fn test_destroy_is_broadcast_exactly_once() {
    let (mut manager, hub, _log) = server().await;
    let crate_id = manager
        .add_entity(Entity::new("Crate").with_component(Networked::new()))
        .unwrap();
    let (_client, mut frames) = hub.connect();
    manager.run_frame();
    manager.run_frame();
    while next_state(&mut frames).is_some() {}

    manager.destroy_entity(crate_id).unwrap();
    manager.run_frame();
    let notice = next_state(&mut frames).unwrap();
    assert_eq!(notice.entities, vec![(crate_id, NetworkEntity::destroyed(crate_id))]);

    manager.run_frame();
    assert!(next_state(&mut frames).is_none());
    assert!(!server_system(&manager).tracker().contains(crate_id));
}

#[tokio::test]
async fn test_full_update_carries_destroy_notices_of_the_same_tick() {
    let (mut manager, hub, _log) = server().await;
    let crate_id = manager
        .add_entity(Entity::new("Crate").with_component(Networked::new()))
        .unwrap();
    let (client, mut frames) = hub.connect();
    manager.run_frame();
    manager.run_frame();
    while next_state(&mut frames).is_some() {}

    manager.destroy_entity(crate_id).unwrap();
    assert!(manager.system_mut::<ServerNetworkSystem>().unwrap().request_full_update(client));
    manager.run_frame();

    let full = next_state(&mut frames).unwrap();
    assert!(full.custom_data[0].as_identity().is_some());
    assert!(full.entity(crate_id).unwrap().destroyed);
    assert!(next_state(&mut frames).is_none());
}

#[tokio::test]
async fn test_accepted_and_rejected_client_writes() {
    let (mut manager, hub, _log) = server().await;
    let (client, mut frames) = hub.connect();
    let owned = manager
        .add_entity(
            Entity::new("Owned")
                .with_component(Networked::owned_by(client))
                .with_component(Score::owned(0, client, Scope::Public)),
        )
        .unwrap();
    let foreign = manager
        .add_entity(
            Entity::new("Foreign")
                .with_component(Networked::new())
                .with_component(Score { points: 3, ..Score::default() }),
        )
        .unwrap();
    manager.run_frame();
    while next_state(&mut frames).is_some() {}

    let stamp = Timestamp::now().as_millis() + 60_000;
    let mut update = client_update(owned, "Score", score_record(5, stamp));
    let mut intrusion = NetworkEntity::new(foreign);
    intrusion.upsert_component("Score", score_record(9, stamp));
    update.push_entity(intrusion);
    assert!(hub.deliver(client, update));
    manager.run_frame();

    let world = manager.world();
    assert_eq!(world.get::<Score>(owned).unwrap().points, 5);
    let untouched = world.get::<Score>(foreign).unwrap();
    assert_eq!(untouched.points, 3);
    assert!(!untouched.force_update());

    let echo = next_state(&mut frames).unwrap();
    let record = echo.entity(owned).unwrap().component("Score").unwrap();
    assert_eq!(record.data, json!({ "points": 5 }));
    assert_eq!(record.update_timestamp, Some(Timestamp::from_millis(stamp)));
    assert!(echo.entity(foreign).is_none());
    assert!(!world.get::<Score>(owned).unwrap().force_update());
}

#[tokio::test]
async fn test_stale_client_write_is_discarded() {
    let (mut manager, hub, _log) = server().await;
    let (client, mut frames) = hub.connect();
    let owned = manager
        .add_entity(
            Entity::new("Owned")
                .with_component(Networked::owned_by(client))
                .with_component(Score::owned(0, client, Scope::Public)),
        )
        .unwrap();
    manager.run_frame();
    while next_state(&mut frames).is_some() {}

    assert!(hub.deliver(client, client_update(owned, "Score", score_record(7, 1))));
    manager.run_frame();
    assert_eq!(manager.world().get::<Score>(owned).unwrap().points, 0);
}

#[tokio::test]
async fn test_private_components_reach_only_their_owner() {
    let (mut manager, hub, _log) = server().await;
    let (alice, mut alice_frames) = hub.connect();
    let (_bob, mut bob_frames) = hub.connect();
    let secret = manager
        .add_entity(
            Entity::new("Secret")
                .with_component(Networked::new())
                .with_component(Score::owned(42, alice, Scope::Private)),
        )
        .unwrap();
    manager.run_frame();

    let for_alice = next_state(&mut alice_frames).unwrap();
    let for_bob = next_state(&mut bob_frames).unwrap();
    assert!(for_alice.entity(secret).unwrap().component("Score").is_some());
    let bob_view = for_bob.entity(secret).unwrap();
    assert!(bob_view.component("Score").is_none());
    assert!(bob_view.component("Networked").is_some());
}

#[tokio::test]
async fn test_unknown_components_custom_data_and_resync() {
    let (mut manager, hub, log) = server().await;
    let (client, mut frames) = hub.connect();
    manager.run_frame();
    manager.run_frame();
    while next_state(&mut frames).is_some() {}
    let player = server_system(&manager).player_of(client).unwrap();

    let mut update = client_update(player, "Exploit", SerializedComponent::new(json!({ "admin": true })));
    update.custom_data.push(CustomData::new("chat").with("text", "hello"));
    update.custom_data.push(CustomData::resync());
    assert!(hub.deliver(client, update));
    manager.run_frame();

    assert_eq!(manager.world().entity(player).unwrap().component_count(), 1);
    assert_eq!(entries(&log), vec![format!("{client}:chat")]);
    let full = next_state(&mut frames).unwrap();
    assert!(full.custom_data[0].as_identity().is_some());
    assert!(full.entity(player).is_some());
}

#[tokio::test]
async fn test_custom_data_routing() {
    let (mut manager, hub, _log) = server().await;
    let (alice, mut alice_frames) = hub.connect();
    let (bob, mut bob_frames) = hub.connect();
    manager.run_frame();
    manager.run_frame();
    while next_state(&mut alice_frames).is_some() {}
    while next_state(&mut bob_frames).is_some() {}

    let server = manager.system_mut::<ServerNetworkSystem>().unwrap();
    server.broadcast_custom(CustomData::new("round").with("number", 2));
    assert!(server.send_custom(bob, CustomData::new("whisper")));
    assert!(!server.send_custom(ClientId::new(), CustomData::new("lost")));
    manager.run_frame();

    let kinds = |state: GameState| -> Vec<String> {
        state
            .custom_data
            .iter()
            .filter_map(|c| c.kind().map(str::to_string))
            .collect()
    };
    assert_eq!(kinds(next_state(&mut alice_frames).unwrap()), vec!["round"]);
    assert_eq!(kinds(next_state(&mut bob_frames).unwrap()), vec!["round", "whisper"]);

    let server = manager.system_mut::<ServerNetworkSystem>().unwrap();
    assert!(server.request_full_update(alice));
    manager.run_frame();
    assert!(next_state(&mut alice_frames).unwrap().custom_data[0].as_identity().is_some());
    assert!(next_state(&mut bob_frames).is_none());
}

#[tokio::test]
async fn test_disconnect_destroys_player() {
    let (mut manager, hub, _log) = server().await;
    let (client, _frames) = hub.connect();
    manager.run_frame();
    let player = server_system(&manager).player_of(client).unwrap();
    assert!(manager.world().contains(player));

    hub.disconnect(client);
    manager.run_frame();
    assert!(!manager.world().contains(player));
    assert_eq!(server_system(&manager).clients().count(), 0);
}

#[tokio::test]
async fn test_second_pending_snapshot_is_dropped() {
    let (_manager, hub, _log) = server().await;
    let client = ClientId::new();
    assert!(hub.deliver(client, GameState::new(Timestamp::from_millis(1))));
    assert!(!hub.deliver(client, GameState::new(Timestamp::from_millis(2))));
    assert_eq!(hub.take(client).unwrap().timestamp, Timestamp::from_millis(1));
    assert_eq!(hub.pending(), 0);
}

#[test]
fn test_hub_outlives_its_system() {
    let (hub, events) = engine_net::ServerHub::new();
    drop(events);
    let (client, _frames) = hub.connect();
    assert!(hub.deliver(client, GameState::new(Timestamp::from_millis(1))));
    hub.disconnect(client);
    assert_eq!(hub.pending(), 0);
}

// ── Client ──────────────────────────────────────────────────────────────────

struct RecordingClientHooks {
    log: Log,
}

impl ClientHooks for RecordingClientHooks {
    fn on_connect(&mut self) {
        self.log.lock().unwrap().push("connect".to_string());
    }

    fn on_disconnect(&mut self) {
        self.log.lock().unwrap().push("disconnect".to_string());
    }

    fn on_new_entity(&mut self, entity: &mut Entity) {
        entity.add_tag("mirrored");
        self.log.lock().unwrap().push(format!("new:{}", entity.name()));
    }

    fn on_custom_data(&mut self, data: &CustomData, _world: &mut World, _commands: &mut Commands) {
        self.log
            .lock()
            .unwrap()
            .push(format!("custom:{}", data.kind().unwrap_or_default()));
    }
}

struct ClientFixture {
    manager: EcsManager,
    link: Arc<engine_net::ClientLink>,
    frames: mpsc::UnboundedReceiver<Frame>,
    log: Log,
}

async fn client() -> ClientFixture {
    let log = Log::default();
    let prefabs = PrefabRegistry::new().with(
        "crate",
        Entity::new("template")
            .with_component(Networked::new())
            .with_component(Score::default())
            .with_tag("prefab"),
    );
    let (system, frames) = ClientNetworkSystem::manual(config(), registry());
    let system = system
        .with_prefabs(prefabs)
        .with_hooks(RecordingClientHooks { log: Arc::clone(&log) });
    let link = system.link();
    let mut manager = EcsManager::new(KernelConfig::new());
    manager.add_system(system).unwrap();
    manager.start().await.unwrap();
    ClientFixture {
        manager,
        link,
        frames,
        log,
    }
}

fn client_system(manager: &EcsManager) -> &ClientNetworkSystem {
    manager.system::<ClientNetworkSystem>().unwrap()
}

fn server_entity(id: EntityId, name: &str, prefab: Option<&str>, points: u32, owner: Option<ClientId>) -> NetworkEntity {
    let mut entity = NetworkEntity::new(id);
    entity.name = Some(name.to_string());
    entity.prefab_name = prefab.map(str::to_string);
    entity.upsert_component(
        "Networked",
        SerializedComponent {
            owner_id: owner,
            ..SerializedComponent::new(json!({}))
        },
    );
    entity.upsert_component(
        "Score",
        SerializedComponent {
            owner_id: owner,
            ..score_record(points, 10)
        },
    );
    entity
}

#[tokio::test]
async fn test_client_mirrors_prefab_and_bare_entities() {
    let mut fx = client().await;
    let me = ClientId::new();
    let from_prefab = EntityId::new();
    let bare = EntityId::new();

    let mut state = GameState::new(Timestamp::now());
    state.custom_data.push(CustomData::identity(me, &registry().fingerprint()));
    state.custom_data.push(CustomData::new("welcome"));
    state.push_entity(server_entity(from_prefab, "Crate", Some("crate"), 4, None));
    state.push_entity(server_entity(bare, "Avatar", None, 1, Some(me)));
    assert!(fx.link.deliver(state));
    fx.manager.run_frame();

    assert_eq!(client_system(&fx.manager).client_id(), Some(me));
    assert_eq!(client_system(&fx.manager).state(), ConnectionState::Connected);

    let world = fx.manager.world();
    let mirrored = world.entity(from_prefab).unwrap();
    assert_eq!(mirrored.name(), "Crate");
    assert_eq!(mirrored.prefab(), Some("crate"));
    assert!(mirrored.has_tag("prefab"));
    assert!(mirrored.has_tag("mirrored"));
    assert_eq!(mirrored.get::<Score>().unwrap().points, 4);

    let avatar = world.entity(bare).unwrap();
    assert!(!avatar.has_tag("prefab"));
    assert_eq!(avatar.get::<Score>().unwrap().points, 1);
    assert_eq!(avatar.get::<Score>().unwrap().owner(), Some(me));
    assert_eq!(avatar.get::<Networked>().unwrap().owner(), Some(me));

    assert_eq!(
        entries(&fx.log),
        vec!["connect", "new:Crate", "new:Avatar", "custom:welcome"]
    );
}

#[tokio::test]
async fn test_client_sends_only_owned_changes() {
    let mut fx = client().await;
    let me = ClientId::new();
    let theirs = EntityId::new();
    let mine = EntityId::new();
    let mut state = GameState::new(Timestamp::now());
    state.custom_data.push(CustomData::identity(me, &registry().fingerprint()));
    state.push_entity(server_entity(theirs, "Crate", None, 4, None));
    state.push_entity(server_entity(mine, "Avatar", None, 1, Some(me)));
    fx.link.deliver(state);
    fx.manager.run_frame();
    fx.manager.run_frame();
    assert!(next_state(&mut fx.frames).is_none());

    fx.manager.world_mut().get_mut::<Score>(mine).unwrap().points = 7;
    fx.manager.world_mut().get_mut::<Score>(theirs).unwrap().points = 99;
    fx.manager.run_frame();

    let sent = next_state(&mut fx.frames).unwrap();
    assert_eq!(sent.entities.len(), 1);
    let record = sent.entity(mine).unwrap().component("Score").unwrap();
    assert_eq!(record.data, json!({ "points": 7 }));
    assert!(record.update_timestamp.is_some());
    assert!(next_state(&mut fx.frames).is_none());
}

#[tokio::test]
async fn test_client_applies_updates_and_destroys() {
    let mut fx = client().await;
    let id = EntityId::new();
    let mut state = GameState::new(Timestamp::now());
    state.push_entity(server_entity(id, "Crate", None, 4, None));
    fx.link.deliver(state);
    fx.manager.run_frame();

    let mut update = GameState::new(Timestamp::now());
    let mut record = NetworkEntity::new(id);
    record.upsert_component("Score", score_record(8, 20));
    update.push_entity(record);
    fx.link.deliver(update);
    fx.manager.run_frame();
    assert_eq!(fx.manager.world().get::<Score>(id).unwrap().points, 8);

    let mut stale = GameState::new(Timestamp::now());
    let mut record = NetworkEntity::new(id);
    record.upsert_component("Score", score_record(2, 15));
    stale.push_entity(record);
    fx.link.deliver(stale);
    fx.manager.run_frame();
    assert_eq!(fx.manager.world().get::<Score>(id).unwrap().points, 8);

    let mut destroy = GameState::new(Timestamp::now());
    destroy.push_entity(NetworkEntity::destroyed(id));
    fx.link.deliver(destroy);
    fx.manager.run_frame();
    assert!(!fx.manager.world().contains(id));
}

#[tokio::test]
async fn test_dropped_snapshot_triggers_resync() {
    let mut fx = client().await;
    assert!(fx.link.deliver(GameState::new(Timestamp::from_millis(1))));
    assert!(!fx.link.deliver(GameState::new(Timestamp::from_millis(2))));
    fx.manager.run_frame();

    let sent = next_state(&mut fx.frames).unwrap();
    assert!(sent.custom_data.iter().any(CustomData::is_resync));
    fx.manager.run_frame();
    assert!(next_state(&mut fx.frames).is_none());
}

#[tokio::test]
async fn test_socket_close_disconnects_once() {
    let mut fx = client().await;
    fx.manager.run_frame();
    fx.link.close();
    fx.manager.run_frame();
    fx.manager.run_frame();

    assert_eq!(client_system(&fx.manager).state(), ConnectionState::Disconnected);
    assert_eq!(entries(&fx.log), vec!["connect", "disconnect"]);
}

#[tokio::test]
async fn test_full_snapshot_prunes_missing_mirrors() {
    let mut fx = client().await;
    let me = ClientId::new();
    let kept = EntityId::new();
    let gone = EntityId::new();
    let mut state = GameState::new(Timestamp::now());
    state.custom_data.push(CustomData::identity(me, &registry().fingerprint()));
    state.push_entity(server_entity(kept, "Avatar", None, 1, Some(me)));
    state.push_entity(server_entity(gone, "Crate", None, 4, None));
    fx.link.deliver(state);
    fx.manager.run_frame();
    assert!(fx.manager.world().contains(gone));

    // A delta that omits an entity leaves it alone.
    fx.link.deliver(GameState::new(Timestamp::now()));
    fx.manager.run_frame();
    assert!(fx.manager.world().contains(gone));

    let mut full = GameState::new(Timestamp::now());
    full.custom_data.push(CustomData::identity(me, &registry().fingerprint()));
    full.push_entity(server_entity(kept, "Avatar", None, 1, Some(me)));
    fx.link.deliver(full);
    fx.manager.run_frame();

    assert!(fx.manager.world().contains(kept));
    assert!(!fx.manager.world().contains(gone));
}

// ── Server and client together ──────────────────────────────────────────────

fn forward_to_client(frames: &mut mpsc::UnboundedReceiver<Frame>, link: &engine_net::ClientLink) -> usize {
    let mut dropped = 0;
    while let Some(state) = next_state(frames) {
        if !link.deliver(state) {
            dropped += 1;
        }
    }
    dropped
}

#[tokio::test]
async fn test_resync_recovers_a_dropped_destroy() {
    let (mut server, hub, _log) = server().await;
    let crate_id = server
        .add_entity(
            Entity::new("Crate")
                .with_component(Networked::new())
                .with_component(Score { points: 2, ..Score::default() }),
        )
        .unwrap();
    let (me, mut server_frames) = hub.connect();
    let mut fx = client().await;

    server.run_frame();
    assert_eq!(forward_to_client(&mut server_frames, &fx.link), 0);
    fx.manager.run_frame();
    assert!(fx.manager.world().contains(crate_id));

    // The inbox is still occupied when the destroy notice arrives.
    assert!(fx.link.deliver(GameState::new(Timestamp::now())));
    server.destroy_entity(crate_id).unwrap();
    server.run_frame();
    assert_eq!(forward_to_client(&mut server_frames, &fx.link), 1);

    fx.manager.run_frame();
    let request = next_state(&mut fx.frames).unwrap();
    assert!(request.custom_data.iter().any(CustomData::is_resync));
    assert!(hub.deliver(me, request));

    server.run_frame();
    assert_eq!(forward_to_client(&mut server_frames, &fx.link), 0);
    fx.manager.run_frame();

    assert!(!fx.manager.world().contains(crate_id));
    let player = server_system(&server).player_of(me).unwrap();
    assert!(fx.manager.world().contains(player));
}
