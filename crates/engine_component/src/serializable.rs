//! Serialization contract for components whose state can leave the process.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::{Component, ComponentId};
use crate::entity::ComponentSlot;

/// Errors produced when applying an untrusted payload.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The payload did not have the expected shape.
    #[error("malformed component payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload was well-formed but semantically invalid.
    #[error("invalid component payload: {0}")]
    Invalid(String),

    /// A record tagged for a different component type.
    #[error("record type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The receiving component's type name.
        expected: &'static str,
        /// The record's type tag.
        found: String,
    },
}

/// A type-tagged serialized component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Runtime type name, used to look up a reconstruction constructor.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Instance identity, present when requested at serialization time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ComponentId>,
    /// The [`SerializableComponent::write`] payload.
    pub data: Value,
}

/// A component that can serialize its semantic state.
pub trait SerializableComponent: Component {
    /// Produce a self-contained payload sufficient to reconstruct the
    /// component's semantic state.
    fn write(&self) -> Value;

    /// Apply a payload produced by [`SerializableComponent::write`].
    ///
    /// The input is untrusted: implementations validate before mutating.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError`] when the payload is malformed or invalid; the
    /// component must be left unchanged in that case.
    fn read(&mut self, data: &Value) -> Result<(), ReadError>;

    /// Wrap [`SerializableComponent::write`] with the runtime type tag.
    fn serialize(&self) -> ComponentRecord {
        ComponentRecord {
            type_name: self.dyn_type_name().to_string(),
            id: None,
            data: self.write(),
        }
    }

    /// Inverse of [`SerializableComponent::serialize`].
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::TypeMismatch`] when the record is tagged for a
    /// different type, otherwise whatever [`SerializableComponent::read`]
    /// returns.
    fn deserialize(&mut self, record: &ComponentRecord) -> Result<(), ReadError> {
        if record.type_name != self.dyn_type_name() {
            return Err(ReadError::TypeMismatch {
                expected: self.dyn_type_name(),
                found: record.type_name.clone(),
            });
        }
        self.read(&record.data)
    }
}

impl ComponentSlot {
    /// Serialize the slot's component, optionally carrying its identity.
    ///
    /// Returns `None` for components that are not serializable.
    #[must_use]
    pub fn serialize(&self, include_identity: bool) -> Option<ComponentRecord> {
        let serializable = self.component().as_serializable()?;
        let mut record = serializable.serialize();
        if include_identity {
            record.id = Some(self.id());
        }
        Some(record)
    }
}

/// Encode a serde value as a component payload.
///
/// Intended for plain data types whose `Serialize` impl cannot fail; a
/// failing impl yields `Value::Null`.
#[must_use]
pub fn write_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

/// Decode a component payload into a serde value.
///
/// # Errors
///
/// Returns [`ReadError::Malformed`] when `data` does not match `T`.
pub fn read_payload<T: DeserializeOwned>(data: &Value) -> Result<T, ReadError> {
    Ok(T::deserialize(data)?)
}
