//! Snapshot wire format.
//!
//! A [`GameState`] is one message: a timestamp, a list of entity records and
//! a list of custom data records. Entity and component maps travel as lists
//! of `[key, value]` pairs so their order survives every codec:
//!
//! ```text
//! { "timestamp": 1700000000000,
//!   "entities": [["<uuid>", { "id": "<uuid>", "name": "Player",
//!                            "components": [["Transform3D", { "data": {..},
//!                                                             "updateTimestamp": 1700000000000,
//!                                                             "ownerId": "<uuid>",
//!                                                             "scope": "private" }]] }]],
//!   "customData": [{ "kind": "engine.identity", "clientId": "<uuid>", "scope": "private" }] }
//! ```
//!
//! A sent snapshot is never mutated; receivers merge it into their live world.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use engine_component::{ClientId, EntityId, Scope, Timestamp};

/// Custom data kind carrying the receiving client's id (server → client).
pub const IDENTITY_KIND: &str = "engine.identity";

/// Custom data kind asking the server for a full snapshot (client → server).
pub const RESYNC_KIND: &str = "engine.resync";

/// One replication message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub entities: Vec<(EntityId, NetworkEntity)>,
    #[serde(default)]
    pub custom_data: Vec<CustomData>,
}

impl GameState {
    #[must_use]
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            entities: Vec::new(),
            custom_data: Vec::new(),
        }
    }

    /// Returns `true` if the message carries no entity and no custom data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.custom_data.is_empty()
    }

    pub fn push_entity(&mut self, entity: NetworkEntity) {
        self.entities.push((entity.id, entity));
    }

    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&NetworkEntity> {
        self.entities
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, entity)| entity)
    }

    /// A copy without the private components owned by anyone but `client`.
    #[must_use]
    pub fn visible_to(&self, client: ClientId) -> GameState {
        let entities = self
            .entities
            .iter()
            .map(|(id, entity)| (*id, entity.visible_to(client)))
            .collect();
        GameState {
            timestamp: self.timestamp,
            entities,
            custom_data: self.custom_data.clone(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The replicated view of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntity {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefab_name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub destroyed: bool,
    #[serde(default)]
    pub components: Vec<(String, SerializedComponent)>,
}

impl NetworkEntity {
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            name: None,
            prefab_name: None,
            destroyed: false,
            components: Vec::new(),
        }
    }

    /// A destroy notice.
    #[must_use]
    pub fn destroyed(id: EntityId) -> Self {
        Self {
            destroyed: true,
            ..Self::new(id)
        }
    }

    #[must_use]
    pub fn component(&self, name: &str) -> Option<&SerializedComponent> {
        self.components
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, component)| component)
    }

    /// Insert or replace a component record, keeping first-seen order.
    pub fn upsert_component(&mut self, name: impl Into<String>, component: SerializedComponent) {
        let name = name.into();
        match self.components.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = component,
            None => self.components.push((name, component)),
        }
    }

    /// Fold a newer record for the same entity into this one.
    pub fn merge(&mut self, newer: &NetworkEntity) {
        if newer.name.is_some() {
            self.name.clone_from(&newer.name);
        }
        if newer.prefab_name.is_some() {
            self.prefab_name.clone_from(&newer.prefab_name);
        }
        self.destroyed |= newer.destroyed;
        for (name, component) in &newer.components {
            self.upsert_component(name.clone(), component.clone());
        }
    }

    /// A copy without the private components owned by anyone but `client`.
    #[must_use]
    pub fn visible_to(&self, client: ClientId) -> NetworkEntity {
        NetworkEntity {
            components: self
                .components
                .iter()
                .filter(|(_, c)| c.is_visible_to(client))
                .cloned()
                .collect(),
            ..self.clone_header()
        }
    }

    fn clone_header(&self) -> NetworkEntity {
        NetworkEntity {
            id: self.id,
            name: self.name.clone(),
            prefab_name: self.prefab_name.clone(),
            destroyed: self.destroyed,
            components: Vec::new(),
        }
    }
}

/// One component's replicated payload and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedComponent {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl SerializedComponent {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data,
            update_timestamp: None,
            owner_id: None,
            scope: None,
        }
    }

    /// The effective scope; absent means public.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope.unwrap_or_default()
    }

    #[must_use]
    pub fn is_visible_to(&self, client: ClientId) -> bool {
        self.scope() == Scope::Public || self.owner_id == Some(client)
    }
}

/// A free-form record carried alongside entity data.
///
/// Application records are plain JSON objects; the `scope` key is lifted
/// out. Records with a `kind` of [`IDENTITY_KIND`] or [`RESYNC_KIND`] are
/// consumed by the network systems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomData {
    #[serde(default)]
    pub scope: Scope,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CustomData {
    /// An empty record tagged with `kind`.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self::default().with("kind", Value::String(kind.into()))
    }

    /// Builder: set a field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.fields.get("kind").and_then(Value::as_str)
    }

    /// The identity record sent to a client with every full snapshot.
    #[must_use]
    pub fn identity(client: ClientId, registry_fingerprint: &str) -> Self {
        Self::new(IDENTITY_KIND)
            .with("clientId", client.0.to_string())
            .with("registry", registry_fingerprint)
            .with_scope(Scope::Private)
    }

    /// The resync request a client sends after dropping server frames.
    #[must_use]
    pub fn resync() -> Self {
        Self::new(RESYNC_KIND).with_scope(Scope::Private)
    }

    #[must_use]
    pub fn is_resync(&self) -> bool {
        self.kind() == Some(RESYNC_KIND)
    }

    /// Parse an identity record into the client id and registry fingerprint.
    #[must_use]
    pub fn as_identity(&self) -> Option<(ClientId, Option<&str>)> {
        if self.kind() != Some(IDENTITY_KIND) {
            return None;
        }
        let client = self.get("clientId")?.as_str()?.parse().ok()?;
        let fingerprint = self.get("registry").and_then(Value::as_str);
        Some((ClientId(client), fingerprint))
    }

    /// Returns `true` for kinds consumed by the network systems.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        matches!(self.kind(), Some(IDENTITY_KIND | RESYNC_KIND))
    }
}
