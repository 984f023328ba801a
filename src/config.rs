// src/config.rs
//! Node configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunable settings for a channel network node.
///
/// Every field carries a default, so a config file may set only the fields
/// it cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Seconds to wait for the base ledger to accept a funding transaction
    #[serde(default = "default_funding_timeout")]
    pub funding_timeout_seconds: u64,

    /// Seconds to wait for the base ledger to accept a settlement
    #[serde(default = "default_settlement_timeout")]
    pub settlement_timeout_seconds: u64,

    /// Longest route the path finder will consider
    #[serde(default = "default_max_route_hops")]
    pub max_route_hops: usize,

    /// Directory for channel snapshots; `None` disables persistence
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_funding_timeout() -> u64 {
    30
}

fn default_settlement_timeout() -> u64 {
    30
}

fn default_max_route_hops() -> usize {
    8
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            funding_timeout_seconds: default_funding_timeout(),
            settlement_timeout_seconds: default_settlement_timeout(),
            max_route_hops: default_max_route_hops(),
            data_dir: None,
        }
    }
}

impl NetworkConfig {
    pub fn funding_timeout(&self) -> Duration {
        Duration::from_secs(self.funding_timeout_seconds)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_seconds)
    }
}
