//! Configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use xlayer_core::{parse_hex_array, Address, ChallengeLevels};

use crate::simulated::Divergence;

/// Simulated execution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Messages executed locally
    pub messages: u64,
    /// Message whose execution diverges from the honest machine
    pub diverge_at_message: Option<u64>,
    /// First diverging opcode within that message
    pub diverge_at_opcode: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            messages: 16,
            diverge_at_message: None,
            diverge_at_opcode: None,
        }
    }
}

impl SimulationConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self {
            messages: env::var("SIM_MESSAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            diverge_at_message: env::var("SIM_DIVERGE_AT_MESSAGE").ok().and_then(|s| s.parse().ok()),
            diverge_at_opcode: env::var("SIM_DIVERGE_AT_OPCODE").ok().and_then(|s| s.parse().ok()),
        }
    }

    /// Divergence point, if this machine is configured to lie.
    ///
    /// The opcode defaults to 1, the first step of the message.
    pub fn divergence(&self) -> Option<Divergence> {
        self.diverge_at_message.map(|message| Divergence {
            message,
            opcode: self.diverge_at_opcode.unwrap_or(1).max(1),
        })
    }
}

/// Validator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Name used in log lines
    pub name: String,
    /// Staker address (hex)
    pub address: String,
    /// Ledger node RPC URL
    pub ledger_rpc: String,
    /// Tracker wake interval in milliseconds
    pub tracker_interval_ms: u64,
    /// Event poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Interval between assertion posts in seconds
    pub post_interval_secs: u64,
    /// History cache directory
    pub cache_dir: String,
    /// Simulated execution settings
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "validator".to_string(),
            address: "0x0000000000000000000000000000000000000001".to_string(),
            ledger_rpc: "http://localhost:8545".to_string(),
            tracker_interval_ms: 1000,
            poll_interval_ms: 1000,
            post_interval_secs: 10,
            cache_dir: "./cache".to_string(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self {
            name: env::var("VALIDATOR_NAME").unwrap_or_else(|_| "validator".to_string()),
            address: env::var("VALIDATOR_ADDRESS")
                .unwrap_or_else(|_| "0x0000000000000000000000000000000000000001".to_string()),
            ledger_rpc: env::var("LEDGER_RPC").unwrap_or_else(|_| "http://localhost:8545".to_string()),
            tracker_interval_ms: env::var("TRACKER_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            post_interval_secs: env::var("POST_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            cache_dir: env::var("CACHE_DIR").unwrap_or_else(|_| "./cache".to_string()),
            simulation: SimulationConfig::from_env(),
        }
    }

    /// Parsed staker address
    pub fn staker(&self) -> anyhow::Result<Address> {
        parse_hex_array(&self.address).map_err(|e| anyhow::anyhow!("invalid VALIDATOR_ADDRESS {}: {}", self.address, e))
    }

    /// Tracker wake interval
    pub const fn tracker_interval(&self) -> Duration {
        Duration::from_millis(self.tracker_interval_ms)
    }

    /// Event poll interval
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Interval between assertion posts
    pub const fn post_interval(&self) -> Duration {
        Duration::from_secs(self.post_interval_secs)
    }

    /// History cache directory
    pub fn cache_path(&self) -> PathBuf {
        PathBuf::from(&self.cache_dir)
    }
}

/// Ledger node configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Listen address
    pub rpc_addr: String,
    /// Presumptive-successor time needed for confirmation
    pub challenge_period_secs: u64,
    /// Per-level maximum heights, outermost first
    pub level_heights: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "0.0.0.0:8545".to_string(),
            challenge_period_secs: 60,
            level_heights: "32,32,32".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self {
            rpc_addr: env::var("RPC_ADDR").unwrap_or_else(|_| "0.0.0.0:8545".to_string()),
            challenge_period_secs: env::var("CHALLENGE_PERIOD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            level_heights: env::var("LEVEL_HEIGHTS").unwrap_or_else(|_| "32,32,32".to_string()),
        }
    }

    /// Parsed level layout
    pub fn levels(&self) -> anyhow::Result<ChallengeLevels> {
        Ok(self.level_heights.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tracker_interval(), Duration::from_secs(1));
        assert_eq!(config.staker().unwrap()[19], 1);
        assert!(config.simulation.divergence().is_none());

        let node = NodeConfig::default();
        assert_eq!(node.levels().unwrap(), ChallengeLevels::default());
    }

    #[test]
    fn test_divergence_defaults_to_first_opcode() {
        let sim = SimulationConfig {
            messages: 4,
            diverge_at_message: Some(2),
            diverge_at_opcode: None,
        };
        assert_eq!(sim.divergence(), Some(Divergence { message: 2, opcode: 1 }));
    }

    #[test]
    fn test_bad_address() {
        let config = Config {
            address: "0x1234".to_string(),
            ..Config::default()
        };
        assert!(config.staker().is_err());
    }
}
