//! # engine_net
//!
//! Delta-snapshot replication of [`Networked`](engine_component::Networked)
//! entities between an authoritative server and mirroring clients, over
//! WebSocket.
//!
//! This crate provides:
//!
//! - [`snapshot`] — the [`GameState`] wire message.
//! - [`codec`] — JSON text and MessagePack binary frame codecs.
//! - [`registry`] — the allow-list of replicable component types.
//! - [`replication`] — dirty detection, last-write-wins apply and the
//!   retained-state tracker shared by both sides.
//! - [`server`] — [`ServerNetworkSystem`] and its [`ServerHub`].
//! - [`client`] — [`ClientNetworkSystem`] and its [`ClientLink`].
//! - [`transport`] — the `tokio-tungstenite` socket tasks.
//! - [`config`] — [`NetConfig`] and [`CompressionConfig`].
//! - [`error`] — Network-layer error types.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod registry;
pub mod replication;
pub mod server;
pub mod snapshot;
pub mod transport;

pub use client::{ClientHooks, ClientLink, ClientNetworkSystem, ConnectionState, DefaultClientHooks};
pub use codec::{Frame, WireFormat, decode, decode_frame, encode, encode_frame};
pub use config::{CompressionConfig, NetConfig};
pub use error::NetError;
pub use registry::{ComponentKind, ComponentRegistry, UnknownComponent};
pub use replication::{ApplyRole, ComponentOutcome, ReplicationTracker};
pub use server::{ClientHandler, ConnectionEvent, DefaultServerHooks, ServerHooks, ServerHub, ServerNetworkSystem};
pub use snapshot::{CustomData, GameState, NetworkEntity, SerializedComponent};
