//! Configuration for the relay.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! command-line flags and environment variables (`PORT`).
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3000
//! path = "/discover"
//! discoverer_id = "discoverer"
//! answer_timeout_secs = 30
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::signaling::protocol::DEFAULT_DISCOVERER_ID;

/// Default listen port when neither `PORT` nor `--port` is set.
pub const DEFAULT_PORT: u16 = 3000;

/// Default WebSocket endpoint path.
pub const DEFAULT_PATH: &str = "/discover";

/// Default deadline for a forwarded offer's answer.
pub const DEFAULT_ANSWER_TIMEOUT_SECS: u64 = 30;

/// Default per-session outbound queue depth.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 32;

/// Resolved relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Path accepted for the WebSocket upgrade.
    pub path: String,
    /// Reserved id of the relay's own node.
    pub discoverer_id: String,
    /// Seconds to wait for a forwarded offer's answer. 0 waits forever.
    pub answer_timeout_secs: u64,
    /// Responses and forwarded offers queued per session before forwards are dropped.
    pub outbound_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            discoverer_id: DEFAULT_DISCOVERER_ID.to_string(),
            answer_timeout_secs: DEFAULT_ANSWER_TIMEOUT_SECS,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn answer_timeout(&self) -> Option<Duration> {
        match self.answer_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Overlay values present in a config file.
    pub fn apply_file(&mut self, file: RelayFileConfig) {
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(path) = file.path {
            self.path = path;
        }
        if let Some(id) = file.discoverer_id {
            self.discoverer_id = id;
        }
        if let Some(secs) = file.answer_timeout_secs {
            self.answer_timeout_secs = secs;
        }
        if let Some(depth) = file.outbound_queue {
            self.outbound_queue = depth;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("'path' must start with '/': {}", self.path));
        }
        if self.discoverer_id.trim().is_empty() {
            return Err("'discoverer_id' must not be empty".to_string());
        }
        if self.outbound_queue == 0 {
            return Err("'outbound_queue' must be at least 1".to_string());
        }
        Ok(())
    }
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RelayFileConfig {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub discoverer_id: Option<String>,
    pub answer_timeout_secs: Option<u64>,
    pub outbound_queue: Option<usize>,
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RelayFileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
