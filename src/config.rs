//! Engine configuration.
//!
//! Defaults suit a local proxy; every field can be overridden from the
//! environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `SOCKS5_LISTEN_ADDR` | [`ServerConfig::listen_addr`] |
//! | `SOCKS5_CONNECT_TIMEOUT_MS` | [`ServerConfig::connect_timeout`] |
//! | `SOCKS5_RELAY_BUFFER_SIZE` | [`ServerConfig::relay_buffer_size`] |
//! | `SOCKS5_OUTBOUND_CAPACITY` | [`ServerConfig::outbound_capacity`] |

use std::{
    net::{Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use tracing::warn;

use crate::{protocol::MAX_REQUEST_LEN, Socks5Error};

pub const ENV_LISTEN_ADDR: &str = "SOCKS5_LISTEN_ADDR";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "SOCKS5_CONNECT_TIMEOUT_MS";
pub const ENV_RELAY_BUFFER_SIZE: &str = "SOCKS5_RELAY_BUFFER_SIZE";
pub const ENV_OUTBOUND_CAPACITY: &str = "SOCKS5_OUTBOUND_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the proxy listens on. Also reported as BND.ADDR / BND.PORT.
    /// Default: `0.0.0.0:1080`
    pub listen_addr: SocketAddr,

    /// Upper bound on a CONNECT dial.
    /// Default: 1 second
    pub connect_timeout: Duration,

    /// Read buffer for each direction of a connection. Must hold a whole
    /// handshake message, so at least [`MAX_REQUEST_LEN`] bytes.
    /// Default: 8 KiB
    pub relay_buffer_size: usize,

    /// Writes queued per connection before senders wait.
    /// Default: 64
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 1080)),
            connect_timeout: Duration::from_secs(1),
            relay_buffer_size: 8 * 1024,
            outbound_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by whichever `SOCKS5_*` variables are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with a custom variable source.
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, ENV_LISTEN_ADDR) {
            config.listen_addr = addr;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var(&lookup, ENV_RELAY_BUFFER_SIZE) {
            config.relay_buffer_size = size;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_OUTBOUND_CAPACITY) {
            config.outbound_capacity = capacity;
        }

        config
    }

    pub fn with_listen_addr(mut self, listen_addr: SocketAddr) -> Self {
        self.listen_addr = listen_addr;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        let mut errors = Vec::new();
        if self.connect_timeout.is_zero() {
            errors.push("connect_timeout must be non-zero");
        }
        if self.relay_buffer_size < MAX_REQUEST_LEN {
            errors.push("relay_buffer_size must hold the largest SOCKS5 request (262 bytes)");
        }
        if self.outbound_capacity == 0 {
            // tokio's bounded channel panics on zero capacity
            errors.push("outbound_capacity must be non-zero");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Socks5Error::Config(errors.join(", ")))
        }
    }
}

fn parse_var<V, F>(lookup: &F, key: &str) -> Option<V>
where
    V: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:1080".parse().unwrap());
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ENV_LISTEN_ADDR, "127.0.0.1:9050"),
            (ENV_CONNECT_TIMEOUT_MS, "250"),
            (ENV_RELAY_BUFFER_SIZE, "4096"),
            (ENV_OUTBOUND_CAPACITY, " 8 "),
        ]));

        assert_eq!(config.listen_addr, "127.0.0.1:9050".parse().unwrap());
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.relay_buffer_size, 4096);
        assert_eq!(config.outbound_capacity, 8);
    }

    #[test]
    fn bad_env_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ENV_LISTEN_ADDR, "not an address"),
            (ENV_CONNECT_TIMEOUT_MS, "-1"),
        ]));
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn buffer_must_fit_largest_request() {
        let config = ServerConfig {
            relay_buffer_size: MAX_REQUEST_LEN - 1,
            ..ServerConfig::default()
        };
        let Err(Socks5Error::Config(message)) = config.validate() else {
            panic!("expected a config error");
        };
        assert!(message.contains("relay_buffer_size"));

        let config = ServerConfig {
            relay_buffer_size: MAX_REQUEST_LEN,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_fail_validation() {
        let config = ServerConfig {
            relay_buffer_size: 0,
            outbound_capacity: 0,
            ..ServerConfig::default()
        }
        .with_connect_timeout(Duration::ZERO);

        let Err(Socks5Error::Config(message)) = config.validate() else {
            panic!("expected a config error");
        };
        assert!(message.contains("connect_timeout"));
        assert!(message.contains("relay_buffer_size"));
        assert!(message.contains("outbound_capacity"));
    }
}
