//! Snapshot codecs.
//!
//! JSON text frames are the default wire format; MessagePack binary frames
//! are the alternative both peers may agree on. Struct fields are encoded
//! by name in MessagePack too, so optional fields can be skipped on the
//! wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NetError;
use crate::snapshot::GameState;

/// The encoding of outgoing snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// UTF-8 JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::MessagePack => f.write_str("msgpack"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" => Ok(Self::MessagePack),
            other => Err(NetError::Config(format!("unknown wire format `{other}`"))),
        }
    }
}

/// One WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec_named(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

/// Encode a snapshot into a frame of the given format.
///
/// # Errors
///
/// Returns [`NetError::Json`] or [`NetError::Encode`] if serialisation fails.
pub fn encode_frame(state: &GameState, format: WireFormat) -> Result<Frame, NetError> {
    match format {
        WireFormat::Json => Ok(Frame::Text(serde_json::to_string(state)?)),
        WireFormat::MessagePack => Ok(Frame::Binary(encode(state)?)),
    }
}

/// Decode a snapshot. Text frames are JSON, binary frames MessagePack,
/// whatever format the receiver sends in.
///
/// # Errors
///
/// Returns [`NetError::Json`] or [`NetError::Decode`] for malformed frames.
pub fn decode_frame(frame: &Frame) -> Result<GameState, NetError> {
    match frame {
        Frame::Text(text) => Ok(serde_json::from_str(text)?),
        Frame::Binary(bytes) => decode(bytes),
    }
}
