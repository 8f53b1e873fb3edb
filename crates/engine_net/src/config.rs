//! Network configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::codec::WireFormat;
use crate::error::NetError;

/// Per-message deflate parameters for the server listener.
///
/// The WebSocket transport does not negotiate per-message deflate, so
/// [`CompressionConfig::validate`] rejects `enabled = true`. The remaining
/// fields are range-checked so a configuration shared with other peers
/// stays well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub chunk_size: usize,
    pub mem_level: u8,
    pub level: u8,
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
    pub concurrency_limit: usize,
    pub threshold: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size: 16 * 1024,
            mem_level: 7,
            level: 3,
            server_no_context_takeover: true,
            client_no_context_takeover: true,
            server_max_window_bits: 10,
            client_max_window_bits: 10,
            concurrency_limit: 10,
            threshold: 1024,
        }
    }
}

impl CompressionConfig {
    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] when compression is enabled or a
    /// parameter is out of range.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.enabled {
            return Err(NetError::Config(
                "per-message deflate is not supported by this transport".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(NetError::Config("compression chunk size must be positive".to_string()));
        }
        if !(1..=9).contains(&self.mem_level) {
            return Err(NetError::Config(format!("compression memory level {} not in 1..=9", self.mem_level)));
        }
        if self.level > 9 {
            return Err(NetError::Config(format!("compression level {} not in 0..=9", self.level)));
        }
        for bits in [self.server_max_window_bits, self.client_max_window_bits] {
            if !(8..=15).contains(&bits) {
                return Err(NetError::Config(format!("window bits {bits} not in 8..=15")));
            }
        }
        if self.concurrency_limit == 0 {
            return Err(NetError::Config("compression concurrency limit must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration shared by the server and client network systems.
#[derive(Debug, Clone, PartialEq)]
pub struct NetConfig {
    /// Address the server listens on.
    pub bind_addr: IpAddr,
    /// Server port; `0` picks an ephemeral port.
    pub port: u16,
    /// URL a client connects to.
    pub server_url: String,
    /// Network system ticks per second.
    pub tick_rate: f64,
    /// Encoding of outgoing snapshots.
    pub wire_format: WireFormat,
    pub compression: CompressionConfig,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            server_url: "ws://127.0.0.1:8080".to_string(),
            tick_rate: 20.0,
            wire_format: WireFormat::Json,
            compression: CompressionConfig::default(),
        }
    }
}

impl NetConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    #[must_use]
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// The socket address the server binds.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Check everything that can be checked before opening sockets.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] for a non-positive tick rate or an
    /// invalid [`CompressionConfig`].
    pub fn validate(&self) -> Result<(), NetError> {
        if self.tick_rate.is_nan() || self.tick_rate <= 0.0 {
            return Err(NetError::Config(format!("tick rate {} must be positive", self.tick_rate)));
        }
        self.compression.validate()
    }
}
