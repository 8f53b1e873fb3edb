//! 3D transform component.
//!
//! [`Transform3D`] represents position, rotation, and scale in 3D space and
//! replicates as
//!
//! ```text
//! { "position": [x, y, z], "rotation": [x, y, z, w], "scale": [x, y, z] }
//! ```

use engine_component::{
    Component, NetworkComponent, NetworkState, ReadError, Scope, SerializableComponent, read_payload,
    write_payload,
};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A 3D transform representing position, rotation, and scale.
///
/// This is the primary spatial component: nearly every visible entity will
/// have a `Transform3D`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform3D {
    /// World-space position.
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Per-axis scale.
    pub scale: Vec3,
    /// Replication bookkeeping.
    #[serde(skip)]
    pub net: NetworkState,
}

impl Transform3D {
    /// The identity transform: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
        net: NetworkState {
            owner: None,
            scope: Scope::Public,
            update_timestamp: None,
            force_update: false,
        },
    };

    /// Create a new transform with the given position and default rotation/scale.
    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Builder: replicate under the given ownership.
    #[must_use]
    pub fn with_network(mut self, net: NetworkState) -> Self {
        self.net = net;
        self
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Component for Transform3D {
    fn type_name() -> &'static str {
        "Transform3D"
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

impl SerializableComponent for Transform3D {
    fn write(&self) -> Value {
        write_payload(self)
    }

    fn read(&mut self, data: &Value) -> Result<(), ReadError> {
        let incoming: Transform3D = read_payload(data)?;
        if !incoming.position.is_finite() || !incoming.scale.is_finite() || !incoming.rotation.is_finite() {
            return Err(ReadError::Invalid("non-finite transform".to_string()));
        }
        let length = incoming.rotation.length();
        if length == 0.0 {
            return Err(ReadError::Invalid("zero-length rotation".to_string()));
        }

        self.position = incoming.position;
        self.scale = incoming.scale;
        // Renormalizing an already unit quaternion could drift the payload.
        self.rotation = if incoming.rotation.is_normalized() {
            incoming.rotation
        } else {
            incoming.rotation / length
        };
        Ok(())
    }
}

impl NetworkComponent for Transform3D {
    fn network_state(&self) -> &NetworkState {
        &self.net
    }

    fn network_state_mut(&mut self) -> &mut NetworkState {
        &mut self.net
    }
}
