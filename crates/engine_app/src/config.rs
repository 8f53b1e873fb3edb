//! Environment-driven runtime configuration.
//!
//! | Variable               | Default               |
//! |------------------------|-----------------------|
//! | `ENGINE_MODE`          | `server`              |
//! | `ENGINE_NET_PORT`      | `8080`                |
//! | `ENGINE_SERVER_URL`    | `ws://127.0.0.1:8080` |
//! | `ENGINE_NET_TICK_RATE` | `20`                  |
//! | `ENGINE_WIRE_FORMAT`   | `json`                |
//! | `ENGINE_FRAME_RATE`    | `60`                  |

use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};

use engine_kernel::KernelConfig;
use engine_net::NetConfig;

/// Which side of the connection this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Server,
    Client,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            other => bail!("unknown mode `{other}`, expected `server` or `client`"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: Mode,
    pub net: NetConfig,
    /// Kernel frames per second.
    pub frame_rate: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            net: NetConfig::default(),
            frame_rate: 60.0,
        }
    }
}

impl AppConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source. Unset
    /// variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(mode) = parse_var(&lookup, "ENGINE_MODE")? {
            config.mode = mode;
        }
        if let Some(port) = parse_var(&lookup, "ENGINE_NET_PORT")? {
            config.net = config.net.with_port(port);
        }
        if let Some(url) = lookup("ENGINE_SERVER_URL") {
            config.net = config.net.with_server_url(url);
        }
        if let Some(rate) = parse_var(&lookup, "ENGINE_NET_TICK_RATE")? {
            config.net = config.net.with_tick_rate(rate);
        }
        if let Some(format) = lookup("ENGINE_WIRE_FORMAT") {
            config.net = config.net.with_wire_format(format.parse()?);
        }
        if let Some(rate) = parse_var(&lookup, "ENGINE_FRAME_RATE")? {
            config.frame_rate = rate;
        }
        Ok(config)
    }

    #[must_use]
    pub fn kernel(&self) -> KernelConfig {
        KernelConfig::new().with_frame_rate(self.frame_rate)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Into<anyhow::Error>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| Into::<anyhow::Error>::into(err).context(format!("invalid {name}: `{raw}`")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use engine_net::WireFormat;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.net.port, 8080);
        assert_eq!(config.net.wire_format, WireFormat::Json);
        assert_eq!(config.frame_rate, 60.0);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ENGINE_MODE", "Client"),
            ("ENGINE_NET_PORT", "9001"),
            ("ENGINE_SERVER_URL", "ws://game.local:9001"),
            ("ENGINE_NET_TICK_RATE", "30"),
            ("ENGINE_WIRE_FORMAT", "msgpack"),
            ("ENGINE_FRAME_RATE", "120"),
        ]))
        .unwrap();
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.net.port, 9001);
        assert_eq!(config.net.server_url, "ws://game.local:9001");
        assert_eq!(config.net.tick_rate, 30.0);
        assert_eq!(config.net.wire_format, WireFormat::MessagePack);
        assert_eq!(config.kernel().frame_rate, 120.0);
    }

    #[test]
    fn test_invalid_values() {
        assert!(AppConfig::from_lookup(lookup(&[("ENGINE_NET_PORT", "eighty")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("ENGINE_MODE", "observer")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("ENGINE_WIRE_FORMAT", "xml")])).is_err());
    }
}
