//! Network contract: ownership, visibility scope, dirty detection and
//! update authorization for replicated components.
//!
//! Every replicated component embeds a [`NetworkState`] and exposes it via
//! [`NetworkComponent::network_state`]. The replication engine reads and
//! writes that state; the component only decides *what* its payload is,
//! whether it changed, and whether a client may overwrite it.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::component::Component;
use crate::serializable::{ReadError, SerializableComponent};

/// Identity of a connected client, assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

/// Who may receive a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Replicated to every client.
    #[default]
    Public,
    /// Replicated only to the owning client.
    Private,
}

/// Replication bookkeeping embedded in every network component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkState {
    /// The client authoritative for this component, if any.
    pub owner: Option<ClientId>,
    /// Visibility scope.
    pub scope: Scope,
    /// Wall-clock time of the last successful write.
    pub update_timestamp: Option<Timestamp>,
    /// One-shot flag: send on the next tick regardless of dirtiness.
    pub force_update: bool,
}

impl NetworkState {
    /// State for a component owned by `client`.
    #[must_use]
    pub fn owned_by(client: ClientId, scope: Scope) -> Self {
        Self {
            owner: Some(client),
            scope,
            ..Self::default()
        }
    }
}

/// A serializable component that participates in replication.
pub trait NetworkComponent: SerializableComponent {
    /// Replication bookkeeping.
    fn network_state(&self) -> &NetworkState;

    /// Mutable replication bookkeeping.
    fn network_state_mut(&mut self) -> &mut NetworkState;

    /// Sender-side predicate: does live state differ from `last_sent`, the
    /// payload most recently transmitted (or `None` if never sent)?
    ///
    /// Must depend only on `self` and `last_sent`, so a retransmission after
    /// loss compares against what was actually sent.
    fn is_dirty(&self, last_sent: Option<&Value>) -> bool {
        match last_sent {
            Some(previous) => *previous != self.write(),
            None => true,
        }
    }

    /// Server-side authorization of a client-originated update. Returning
    /// `false` discards the update silently.
    ///
    /// Defaults to "the sender owns this component".
    fn accept(&self, _data: &Value, sender: &ClientId) -> bool {
        self.network_state().owner.as_ref() == Some(sender)
    }

    fn owner(&self) -> Option<ClientId> {
        self.network_state().owner
    }

    fn scope(&self) -> Scope {
        self.network_state().scope
    }

    fn update_timestamp(&self) -> Option<Timestamp> {
        self.network_state().update_timestamp
    }

    fn force_update(&self) -> bool {
        self.network_state().force_update
    }

    /// Request a send on the next tick even if nothing changed.
    fn set_force_update(&mut self) {
        self.network_state_mut().force_update = true;
    }
}

/// Marker that makes an entity replicated.
///
/// Its owner identifies the client authoritative for the entity as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Networked {
    pub net: NetworkState,
}

impl Networked {
    /// A server-owned marker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A marker for an entity owned by `client`.
    #[must_use]
    pub fn owned_by(client: ClientId) -> Self {
        Self {
            net: NetworkState::owned_by(client, Scope::Public),
        }
    }
}

impl Component for Networked {
    fn type_name() -> &'static str {
        "Networked"
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

impl SerializableComponent for Networked {
    fn write(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    fn read(&mut self, data: &Value) -> Result<(), ReadError> {
        if data.is_object() {
            Ok(())
        } else {
            Err(ReadError::Invalid("expected an object".to_string()))
        }
    }
}

impl NetworkComponent for Networked {
    fn network_state(&self) -> &NetworkState {
        &self.net
    }

    fn network_state_mut(&mut self) -> &mut NetworkState {
        &mut self.net
    }

    /// Ownership of the entity is decided by the server alone.
    fn accept(&self, _data: &Value, _sender: &ClientId) -> bool {
        false
    }
}
