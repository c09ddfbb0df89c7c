//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`MPNET_*`)

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};
use crate::transport::{FragmentationPolicy, DEFAULT_BACKLOG, MAX_UDP_PAYLOAD};

/// Port used by the adaptive session when none is configured.
pub const DEFAULT_PORT: u16 = 9000;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Session construction settings
    #[serde(default)]
    pub session: SessionConfig,

    /// UDP fragmentation settings
    #[serde(default)]
    pub udp: UdpConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            NetError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
                    None
                }
            }
        }

        let mut config = Self::default();

        if let Some(host) = lookup("MPNET_HOST") {
            config.session.host = host;
        }
        if let Some(port) = parsed(&lookup, "MPNET_PORT") {
            config.session.port = port;
        }
        if let Some(backlog) = parsed(&lookup, "MPNET_BACKLOG") {
            config.session.backlog = backlog;
        }
        if let Some(timeout) = parsed(&lookup, "MPNET_CONNECT_TIMEOUT_MS") {
            config.session.connect_timeout_ms = timeout;
        }

        if let Some(max_length) = parsed(&lookup, "MPNET_UDP_MAX_LENGTH") {
            config.udp.max_length = max_length;
        }
        if let Some(policy) = parsed(&lookup, "MPNET_UDP_POLICY") {
            config.udp.policy = policy;
        }

        config
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        self.session.bind_ip()?;
        if !(1..=MAX_UDP_PAYLOAD).contains(&self.udp.max_length) {
            return Err(NetError::Config(format!(
                "udp.max_length must be in [1, {}], got {}",
                MAX_UDP_PAYLOAD, self.udp.max_length
            )));
        }
        Ok(())
    }
}

/// Session construction configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// IP address sessions bind to
    pub host: String,

    /// Port the adaptive session binds its sessions to
    pub port: u16,

    /// Listen backlog for TCP server sessions
    pub backlog: i32,

    /// Connect timeout in milliseconds (0 = block indefinitely)
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            connect_timeout_ms: 0,
        }
    }
}

impl SessionConfig {
    /// Parsed bind IP.
    pub fn bind_ip(&self) -> Result<IpAddr> {
        self.host
            .trim()
            .parse()
            .map_err(|_| NetError::Config(format!("invalid bind host {:?}", self.host)))
    }

    /// Get the full bind address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.port))
    }

    /// The connect timeout, `None` when connects block indefinitely.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

/// UDP fragmentation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Largest payload sent as a single datagram
    pub max_length: usize,

    /// What to do with larger payloads
    pub policy: FragmentationPolicy,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            max_length: MAX_UDP_PAYLOAD,
            policy: FragmentationPolicy::Subdivide,
        }
    }
}
