//! Network-layer error types.

use crate::registry::UnknownComponent;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a message to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a message from MessagePack.
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Failed to encode or decode a JSON text frame.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket handshake or framing error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket bind or accept error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected network configuration.
    #[error("invalid network configuration: {0}")]
    Config(String),

    /// A component name outside the allow-list.
    #[error(transparent)]
    UnknownComponent(#[from] UnknownComponent),
}
