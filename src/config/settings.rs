use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

static DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_API_PORT: u16 = 3000;
const DEFAULT_P2P_PORT: u16 = 4000;

const NODE_HOST_KEY: &str = "NODE_HOST";
const API_PORT_KEY: &str = "API_PORT";
const P2P_PORT_KEY: &str = "P2P_PORT";

/// Node configuration.
///
/// Built from defaults, then an optional TOML file, then environment
/// variables; the binary applies command-line flags last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub api_port: u16,
    /// 0 binds an ephemeral port
    pub p2p_port: u16,
    /// First node of a network: initialized without syncing
    pub first: bool,
    pub network: NetworkSettings,
    pub mining: MiningSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Delay between consecutive sends of a broadcast
    pub send_interval_ms: u64,
    /// Handler worker threads
    pub workers: usize,
    /// Datagrams queued for the workers before new ones are dropped
    pub queue_capacity: usize,
    pub max_datagram_size: usize,
    /// How often the receive loop wakes up to check for shutdown
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningSettings {
    /// Hex prefix a block hash must start with
    pub difficulty: String,
    pub max_rounds: u32,
    pub round_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Delay between consecutive gap-fill requests
    pub request_interval_ms: u64,
    /// Wait after the sync request before mining is permitted
    pub settle_ms: u64,
    /// Cap on gap-fill requests sent for a single orphan
    pub max_gap_requests: u32,
    /// Off-chain blocks this many heights below the tail are forgotten
    pub fork_depth: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: String::from(DEFAULT_HOST),
            api_port: DEFAULT_API_PORT,
            p2p_port: DEFAULT_P2P_PORT,
            first: false,
            network: NetworkSettings::default(),
            mining: MiningSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            send_interval_ms: 500,
            workers: 4,
            queue_capacity: 1024,
            max_datagram_size: 65507,
            read_timeout_ms: 200,
        }
    }
}

impl Default for MiningSettings {
    fn default() -> Self {
        MiningSettings {
            difficulty: String::from("00"),
            max_rounds: 60,
            round_interval_ms: 1000,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            request_interval_ms: 500,
            settle_ms: 1000,
            max_gap_requests: 64,
            fork_depth: 64,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Override the node identity from `NODE_HOST`, `API_PORT` and `P2P_PORT`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(NODE_HOST_KEY) {
            self.host = host;
        }
        if let Some(port) = lookup(API_PORT_KEY) {
            self.api_port = parse_port(API_PORT_KEY, &port)?;
        }
        if let Some(port) = lookup(P2P_PORT_KEY) {
            self.p2p_port = parse_port(P2P_PORT_KEY, &port)?;
        }
        Ok(())
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| BlockchainError::Config(format!("Invalid {key} value {value:?}: {e}")))
}

impl NetworkSettings {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl MiningSettings {
    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }
}

impl SyncSettings {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
