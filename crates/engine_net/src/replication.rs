//! Diff and apply engine shared by the server and client systems.
//!
//! The sending side keeps a [`ReplicationTracker`]: the last payload
//! transmitted (or received) per entity and component. A component goes
//! out when it is dirty against that record or flagged with
//! `force_update`. The receiving side applies records through
//! [`apply_entity`], which enforces the allow-list, the authorization
//! predicate on the server and last-write-wins timestamp ordering.

use std::collections::HashMap;

use tracing::{debug, warn};

use engine_component::{ClientId, Component, ComponentSlot, EntityId, NetworkComponent, Timestamp};
use engine_kernel::World;

use crate::registry::{ComponentKind, ComponentRegistry};
use crate::snapshot::{GameState, NetworkEntity, SerializedComponent};

/// Which side is applying a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyRole {
    /// The authoritative server, applying a write from `sender`.
    Server { sender: ClientId },
    /// A client mirror, applying server state.
    Client,
}

/// What happened to one incoming component record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentOutcome {
    /// Payload read and metadata adopted.
    Applied,
    /// Not newer than the local state.
    Stale,
    /// The component's `accept` predicate refused the sender.
    Rejected,
    /// `read` refused the payload; the component is unchanged.
    Invalid,
    /// Name outside the allow-list.
    Unknown,
    /// Allow-listed, but the entity carries no such component.
    Missing,
}

/// The record describing a component's current replicated state.
#[must_use]
pub fn synced(component: &dyn NetworkComponent) -> SerializedComponent {
    SerializedComponent {
        data: component.write(),
        update_timestamp: component.update_timestamp(),
        owner_id: component.owner(),
        scope: Some(component.scope()),
    }
}

/// Apply one record to a live component.
///
/// A rejected, stale or invalid record leaves the component untouched,
/// including its `force_update` flag.
pub fn apply_component(
    component: &mut dyn NetworkComponent,
    incoming: &SerializedComponent,
    role: ApplyRole,
) -> ComponentOutcome {
    if let ApplyRole::Server { sender } = role
        && !component.accept(&incoming.data, &sender)
    {
        return ComponentOutcome::Rejected;
    }

    if let (Some(theirs), Some(ours)) = (incoming.update_timestamp, component.update_timestamp())
        && theirs <= ours
    {
        return ComponentOutcome::Stale;
    }

    if let Err(err) = component.read(&incoming.data) {
        warn!(component = component.dyn_type_name(), error = %err, "discarding unreadable component payload");
        return ComponentOutcome::Invalid;
    }

    let state = component.network_state_mut();
    if incoming.update_timestamp.is_some() {
        state.update_timestamp = incoming.update_timestamp;
    }
    match role {
        ApplyRole::Server { .. } => state.force_update = true,
        ApplyRole::Client => {
            state.owner = incoming.owner_id;
            state.scope = incoming.scope();
        }
    }
    ComponentOutcome::Applied
}

/// Apply every component record of `incoming` to the matching slots.
///
/// Applied records are recorded in `tracker` as synchronized. The destroyed
/// flag is not looked at; callers decide what a destroy notice means for
/// their side.
pub fn apply_entity<'a>(
    slots: impl Iterator<Item = &'a mut ComponentSlot>,
    incoming: &NetworkEntity,
    registry: &ComponentRegistry,
    role: ApplyRole,
    tracker: &mut ReplicationTracker,
) -> Vec<(String, ComponentOutcome)> {
    let mut slots: Vec<&mut ComponentSlot> = slots.collect();
    let mut outcomes = Vec::with_capacity(incoming.components.len());

    for (name, record) in &incoming.components {
        let outcome = if let Err(err) = registry.resolve(name) {
            warn!(entity = %incoming.id, error = %err, "skipping component");
            ComponentOutcome::Unknown
        } else {
            let target = slots
                .iter_mut()
                .find(|slot| slot.component().dyn_type_name() == name.as_str())
                .and_then(|slot| slot.component_mut().as_network_mut());
            match target {
                None => ComponentOutcome::Missing,
                Some(component) => {
                    let outcome = apply_component(component, record, role);
                    if outcome == ComponentOutcome::Applied {
                        tracker.record_received(incoming.id, name, synced(component));
                    }
                    outcome
                }
            }
        };

        match outcome {
            ComponentOutcome::Stale => {
                debug!(entity = %incoming.id, component = %name, "discarding stale update");
            }
            ComponentOutcome::Rejected => {
                debug!(entity = %incoming.id, component = %name, "update not accepted from sender");
            }
            _ => {}
        }
        outcomes.push((name.clone(), outcome));
    }
    outcomes
}

/// Build a component of `kind` from its first record, as a client does for
/// components it has never seen. Returns the component and its synchronized
/// record, or `None` if the record could not be applied.
#[must_use]
pub fn materialize(
    kind: &ComponentKind,
    incoming: &SerializedComponent,
) -> Option<(Box<dyn Component>, SerializedComponent)> {
    let mut component = kind.create();
    let record = {
        let network = component.as_network_mut()?;
        if apply_component(network, incoming, ApplyRole::Client) != ComponentOutcome::Applied {
            return None;
        }
        synced(network)
    };
    Some((component, record))
}

/// Last transmitted state per entity, used for dirty detection and full
/// snapshots.
#[derive(Debug, Default)]
pub struct ReplicationTracker {
    retained: HashMap<EntityId, NetworkEntity>,
    order: Vec<EntityId>,
}

impl ReplicationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.retained.contains_key(&id)
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&NetworkEntity> {
        self.retained.get(&id)
    }

    /// Build the delta record for one entity, or `None` when nothing on it
    /// needs sending.
    ///
    /// Dirty components are stamped with `now`; `force_update` flags are
    /// cleared for every component included.
    pub fn serialize_entity(
        &self,
        world: &mut World,
        id: EntityId,
        registry: &ComponentRegistry,
        now: Timestamp,
    ) -> Option<NetworkEntity> {
        let entity = world.entity(id)?;
        let retained = self.retained.get(&id);
        let name = entity.name().to_string();
        let prefab = entity.prefab().map(str::to_string);

        let mut record = NetworkEntity::new(id);
        if retained.is_none_or(|r| r.name.as_deref() != Some(name.as_str())) {
            record.name = Some(name);
        }
        if retained.is_none_or(|r| r.prefab_name != prefab) {
            record.prefab_name = prefab;
        }

        for slot in world.slots_mut(id)? {
            let component = slot.component_mut();
            let class = component.dyn_type_name();
            if !registry.contains(class) {
                continue;
            }
            let Some(network) = component.as_network_mut() else {
                continue;
            };

            let last = retained.and_then(|r| r.component(class));
            let reassigned = last.is_some_and(|l| l.owner_id != network.owner() || l.scope() != network.scope());
            let dirty = reassigned || network.is_dirty(last.map(|l| &l.data));
            if !dirty && !network.force_update() {
                continue;
            }

            let state = network.network_state_mut();
            if dirty {
                state.update_timestamp = Some(now);
            }
            state.force_update = false;
            record.upsert_component(class, synced(network));
        }

        if record.components.is_empty() {
            None
        } else {
            Some(record)
        }
    }

    /// Fold a transmitted delta into the retained state.
    pub fn merge(&mut self, delta: &NetworkEntity) {
        match self.retained.get_mut(&delta.id) {
            Some(existing) => existing.merge(delta),
            None => {
                self.order.push(delta.id);
                self.retained.insert(delta.id, delta.clone());
            }
        }
    }

    /// Remember a payload received from a peer as already synchronized.
    pub fn record_received(&mut self, id: EntityId, name: &str, component: SerializedComponent) {
        if !self.retained.contains_key(&id) {
            self.order.push(id);
        }
        self.retained
            .entry(id)
            .or_insert_with(|| NetworkEntity::new(id))
            .upsert_component(name, component);
    }

    /// Flag a retained entity for a one-time destroy notice. Returns `false`
    /// if it was never transmitted.
    pub fn mark_destroyed(&mut self, id: EntityId) -> bool {
        match self.retained.get_mut(&id) {
            Some(record) => {
                record.destroyed = true;
                true
            }
            None => false,
        }
    }

    /// Drop every record marked destroyed and return their destroy notices.
    pub fn flush_destroyed(&mut self) -> Vec<NetworkEntity> {
        let retained = &mut self.retained;
        let mut notices = Vec::new();
        self.order.retain(|id| {
            let destroyed = retained.get(id).is_some_and(|r| r.destroyed);
            if destroyed {
                retained.remove(id);
                notices.push(NetworkEntity::destroyed(*id));
            }
            !destroyed
        });
        notices
    }

    /// Drop an entity without a notice.
    pub fn forget(&mut self, id: EntityId) {
        if self.retained.remove(&id).is_some() {
            self.order.retain(|e| *e != id);
        }
    }

    /// Every live retained entity, in first-transmission order.
    #[must_use]
    pub fn snapshot(&self, timestamp: Timestamp) -> GameState {
        let mut state = GameState::new(timestamp);
        for id in &self.order {
            if let Some(record) = self.retained.get(id)
                && !record.destroyed
            {
                state.entities.push((*id, record.clone()));
            }
        }
        state
    }
}
