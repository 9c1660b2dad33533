//! Node configuration: everything a [`crate::Node`] needs to construct
//! itself, loaded from TOML by `peervault-cli`. Fields only the CLI cares
//! about (log level, which node name to run) stay in the CLI's own `Cli`
//! struct, never here, so that CLI flags can never change core semantics.

use peervault_health::HealthConfig;
use peervault_resource::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the node's single active [`peervault_core::EncryptionKey`] comes
/// from: exactly one key is active per node at any time, either given
/// inline or loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EncryptionKeySource {
    /// 64 hex characters, inline in the config file. Convenient for tests
    /// and local development; not recommended for production configs since
    /// it puts key material in the same file as everything else.
    Inline { key_hex: String },
    /// Path to a file holding either 32 raw bytes or a hex/base64-encoded
    /// string of the key, resolved relative to the config file's directory.
    File { path: String },
}

/// Tunables for the node's `peervault-resource::ResourceManager`, in their
/// serializable form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimitsConfig {
    pub max_concurrent_streams: usize,
    pub stream_timeout_secs: u64,
    pub rate_limit_per_sec: f64,
    pub burst_limit: u32,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        let defaults = ResourceLimits::default();
        Self {
            max_concurrent_streams: defaults.max_concurrent_streams,
            stream_timeout_secs: defaults.stream_timeout.as_secs(),
            rate_limit_per_sec: defaults.rate_limit_per_sec,
            burst_limit: defaults.burst_limit,
        }
    }
}

impl From<ResourceLimitsConfig> for ResourceLimits {
    fn from(cfg: ResourceLimitsConfig) -> Self {
        ResourceLimits {
            max_concurrent_streams: cfg.max_concurrent_streams,
            stream_timeout: Duration::from_secs(cfg.stream_timeout_secs),
            rate_limit_per_sec: cfg.rate_limit_per_sec,
            burst_limit: cfg.burst_limit,
        }
    }
}

/// Tunables for the node's `peervault-health::HealthManager`, in their
/// serializable form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfigToml {
    pub heartbeat_interval_secs: u64,
    pub health_timeout_secs: u64,
    pub reconnect_interval_secs: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for HealthConfigToml {
    fn default() -> Self {
        let defaults = HealthConfig::default();
        Self {
            heartbeat_interval_secs: defaults.heartbeat_interval.as_secs(),
            health_timeout_secs: defaults.health_timeout.as_secs(),
            reconnect_interval_secs: defaults.reconnect_interval.as_secs(),
            max_reconnect_attempts: defaults.max_reconnect_attempts,
        }
    }
}

impl From<HealthConfigToml> for HealthConfig {
    fn from(cfg: HealthConfigToml) -> Self {
        HealthConfig {
            heartbeat_interval: Duration::from_secs(cfg.heartbeat_interval_secs),
            health_timeout: Duration::from_secs(cfg.health_timeout_secs),
            reconnect_interval: Duration::from_secs(cfg.reconnect_interval_secs),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
        }
    }
}

/// Everything a [`crate::Node`] needs to construct itself, `serde`-derived
/// for TOML loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address this node's transport listens on, e.g. `"0.0.0.0:3000"`.
    pub listen_addr: String,

    /// Addresses dialed once at startup, e.g. `["127.0.0.1:3001"]`.
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,

    /// Directory prefix under which the storage root (derived from
    /// `listen_addr`) is created. `None` uses the current working
    /// directory.
    #[serde(default)]
    pub storage_root_prefix: Option<String>,

    pub encryption_key: EncryptionKeySource,

    /// HMAC shared secret verified during the handshake. Every node that
    /// should be allowed to join this mesh must be configured with the
    /// same value.
    pub shared_secret: String,

    #[serde(default)]
    pub resource_limits: ResourceLimitsConfig,

    #[serde(default)]
    pub health: HealthConfigToml,
}
