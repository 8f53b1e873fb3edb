//! A real server and client talking over a WebSocket on an ephemeral port.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use engine_component::{
    ClientId, Component, Entity, EntityId, NetworkComponent, NetworkState, Networked, ReadError, Scope,
    SerializableComponent, read_payload, write_payload,
};
use engine_kernel::{Commands, EcsManager, KernelConfig};
use engine_net::{
    ClientNetworkSystem, ComponentRegistry, ConnectionState, NetConfig, ServerHooks, ServerNetworkSystem,
    WireFormat,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Score {
    points: u32,
    #[serde(skip)]
    net: NetworkState,
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

/// Players get an avatar whose score they own.
struct Avatars;

impl ServerHooks for Avatars {
    fn create_player(&mut self, client: ClientId, commands: &mut Commands) -> Option<EntityId> {
        let avatar = Entity::new("Avatar")
            .with_component(Networked::owned_by(client))
            .with_component(Score {
                points: 0,
                net: NetworkState::owned_by(client, Scope::Public),
            });
        Some(commands.add_entity(avatar))
    }
}

fn registry() -> ComponentRegistry {
    ComponentRegistry::new().with::<Score>()
}

struct Pair {
    server: EcsManager,
    client: EcsManager,
    beacon: EntityId,
}

async fn connect_pair(format: WireFormat) -> Pair {
    let server_config = NetConfig::new()
        .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_port(0)
        .with_tick_rate(f64::INFINITY)
        .with_wire_format(format);
    let mut server = EcsManager::new(KernelConfig::new());
    server
        .add_system(ServerNetworkSystem::new(server_config, registry()).with_hooks(Avatars))
        .unwrap();
    let beacon = server
        .add_entity(
            Entity::new("Beacon")
                .with_component(Networked::new())
                .with_component(Score {
                    points: 3,
                    ..Score::default()
                }),
        )
        .unwrap();
    server.start().await.unwrap();
    let addr = server.system::<ServerNetworkSystem>().unwrap().local_addr().unwrap();

    let client_config = NetConfig::new()
        .with_server_url(format!("ws://{addr}"))
        .with_tick_rate(f64::INFINITY)
        .with_wire_format(format);
    let mut client = EcsManager::new(KernelConfig::new());
    client
        .add_system(ClientNetworkSystem::new(client_config, registry()))
        .unwrap();
    client.start().await.unwrap();

    Pair { server, client, beacon }
}

impl Pair {
    /// Run both loops until `done` holds, for at most two seconds.
    async fn pump_until(&mut self, mut done: impl FnMut(&EcsManager, &EcsManager) -> bool) -> bool {
        for _ in 0..200 {
            self.server.run_frame();
            self.client.run_frame();
            if done(&self.server, &self.client) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn avatar(&self) -> Option<EntityId> {
        let me = self.client.system::<ClientNetworkSystem>()?.client_id()?;
        self.server.system::<ServerNetworkSystem>()?.player_of(me)
    }

    async fn wait_for_mirror(&mut self) -> EntityId {
        let beacon = self.beacon;
        let mirrored = self
            .pump_until(|server, client| {
                let Some(me) = client.system::<ClientNetworkSystem>().and_then(|c| c.client_id()) else {
                    return false;
                };
                let Some(avatar) = server.system::<ServerNetworkSystem>().and_then(|s| s.player_of(me)) else {
                    return false;
                };
                client.world().contains(beacon) && client.world().contains(avatar)
            })
            .await;
        assert!(mirrored, "client never mirrored the server world");
        self.avatar().unwrap()
    }
}

#[tokio::test]
async fn test_round_trip_over_websocket() {
    let mut pair = connect_pair(WireFormat::Json).await;
    let avatar = pair.wait_for_mirror().await;
    let beacon = pair.beacon;

    let client_system = pair.client.system::<ClientNetworkSystem>().unwrap();
    assert_eq!(client_system.state(), ConnectionState::Connected);
    assert_eq!(pair.client.world().get::<Score>(beacon).unwrap().points, 3);

    pair.client.world_mut().get_mut::<Score>(avatar).unwrap().points = 12;
    let accepted = pair
        .pump_until(|server, _| server.world().get::<Score>(avatar).is_some_and(|s| s.points == 12))
        .await;
    assert!(accepted, "server never applied the owned write");

    pair.client.world_mut().get_mut::<Score>(beacon).unwrap().points = 99;
    pair.server.world_mut().get_mut::<Score>(beacon).unwrap().points = 5;
    let replicated = pair
        .pump_until(|_, client| client.world().get::<Score>(beacon).is_some_and(|s| s.points == 5))
        .await;
    assert!(replicated, "client never saw the server write");
    assert_eq!(pair.server.world().get::<Score>(beacon).unwrap().points, 5);

    pair.client.stop().await.unwrap();
    let cleaned_up = pair.pump_until(|server, _| !server.world().contains(avatar)).await;
    assert!(cleaned_up, "server kept the avatar of a departed client");
    assert_eq!(pair.server.system::<ServerNetworkSystem>().unwrap().clients().count(), 0);

    pair.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_msgpack_frames() {
    let mut pair = connect_pair(WireFormat::MessagePack).await;
    let avatar = pair.wait_for_mirror().await;
    assert_eq!(pair.client.world().get::<Score>(pair.beacon).unwrap().points, 3);
    assert_eq!(
        pair.client.world().get::<Networked>(avatar).unwrap().owner(),
        pair.client.system::<ClientNetworkSystem>().unwrap().client_id()
    );

    pair.client.stop().await.unwrap();
    pair.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_enabled_compression_fails_server_start() {
    let config = NetConfig::new().with_port(0).with_compression(engine_net::CompressionConfig {
        enabled: true,
        ..engine_net::CompressionConfig::default()
    });
    let mut server = EcsManager::new(KernelConfig::new());
    server
        .add_system(ServerNetworkSystem::new(config, registry()))
        .unwrap();
    assert!(server.start().await.is_err());
}
