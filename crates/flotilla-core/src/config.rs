//! flotilla.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlotillaConfig {
    pub manager: ManagerConfig,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Service catalog keyed by service type. Ordered so group creation
    /// and config rendering are deterministic across runs.
    pub services: BTreeMap<String, ServiceSpec>,
}

/// Address of the manager (monitor) HTTP/WebSocket server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub ip: String,
    pub port: u16,
}

impl ManagerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Where the rendered proxy configuration is written. Fully
    /// overwritten on every reconcile, never patched.
    pub config_path: PathBuf,
    /// Filesystem root the proxy serves static assets from.
    pub static_root: PathBuf,
    /// Proxy binary name or path.
    #[serde(default = "default_proxy_binary")]
    pub binary: String,
}

fn default_proxy_binary() -> String {
    "nginx".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// How long response stats are retained, in seconds. Also the
    /// period of the retention sweep.
    pub retention_secs: u64,
    /// Durable event archive location.
    pub archive_path: PathBuf,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            archive_path: PathBuf::from("/var/lib/flotilla/events.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Ceiling on how long a correlated call waits for its response.
    pub call_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 10,
        }
    }
}

/// Catalog entry for one service type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Executable launched for each instance of this type.
    pub script: PathBuf,
    /// Internal routing suffix, e.g. `/prime-number`.
    pub location: String,
    /// Ports are assigned upward from this base, one per instance.
    pub base_port: u16,
    pub max_instances: u32,
    #[serde(default)]
    pub initial_instances: u32,
}

impl FlotillaConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FlotillaConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
