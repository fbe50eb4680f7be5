//! Project configuration — `rivet.yaml` networks and state location.
//!
//! Network settings are passed explicitly into the executor and target
//! adapter; nothing here reads ambient process state.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the built-in local network.
pub const LOCAL_NETWORK: &str = "hardhat";

/// Chain id of the built-in local network.
pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Root project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory holding the ledger, audit logs and simulated chain state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Network used when `--network` is not given
    #[serde(default = "default_network")]
    pub default_network: String,

    /// Known networks
    #[serde(default)]
    pub networks: IndexMap<String, NetworkConfig>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let mut networks = IndexMap::new();
        networks.insert(LOCAL_NETWORK.to_string(), NetworkConfig::local());
        Self {
            state_dir: default_state_dir(),
            default_network: default_network(),
            networks,
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_network() -> String {
    LOCAL_NETWORK.to_string()
}

/// A deployment target network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Chain identifier, part of the default run id
    pub chain_id: u64,

    /// Confirmations required before a submission counts as landed
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,

    /// Upper bound on a single submission, in seconds
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// An in-flight record older than this is reconciled and retried
    #[serde(default = "default_stale_in_flight")]
    pub stale_in_flight_secs: u64,

    /// Per-network overrides for declaration params
    #[serde(default)]
    pub params: IndexMap<String, Value>,
}

fn default_confirmations() -> u32 {
    1
}

fn default_submit_timeout() -> u64 {
    300
}

fn default_stale_in_flight() -> u64 {
    900
}

impl NetworkConfig {
    /// The built-in local development network.
    pub fn local() -> Self {
        Self {
            chain_id: LOCAL_CHAIN_ID,
            confirmations: default_confirmations(),
            submit_timeout_secs: default_submit_timeout(),
            stale_in_flight_secs: default_stale_in_flight(),
            params: IndexMap::new(),
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn stale_in_flight(&self) -> Duration {
        Duration::from_secs(self.stale_in_flight_secs)
    }
}

/// A network selected by name, ready to hand to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedNetwork {
    pub name: String,
    pub config: NetworkConfig,
}

impl SelectedNetwork {
    pub fn local() -> Self {
        Self {
            name: LOCAL_NETWORK.to_string(),
            config: NetworkConfig::local(),
        }
    }

    /// Default run id for a declaration on this network.
    pub fn default_run_id(&self, declaration: &str) -> String {
        format!("{}-chain-{}", declaration, self.config.chain_id)
    }
}

impl ProjectConfig {
    /// Select a network by name, falling back to `default_network`.
    pub fn network(&self, name: Option<&str>) -> Result<SelectedNetwork> {
        let name = name.unwrap_or(&self.default_network);
        if let Some(config) = self.networks.get(name) {
            return Ok(SelectedNetwork {
                name: name.to_string(),
                config: config.clone(),
            });
        }
        if name == LOCAL_NETWORK {
            return Ok(SelectedNetwork::local());
        }
        Err(Error::Config(format!("unknown network: {}", name)))
    }

    /// Path of the ledger database.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("ledger.sqlite")
    }
}

/// Load `rivet.yaml`. A missing file yields the default configuration.
pub fn load_project_config(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let config: ProjectConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?;
    let errors = validate_project_config(&config);
    if let Some(first) = errors.first() {
        return Err(Error::Config(first.clone()));
    }
    Ok(config)
}

/// Validate a project config. Returns a list of problems (empty = valid).
pub fn validate_project_config(config: &ProjectConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if !config.networks.contains_key(&config.default_network)
        && config.default_network != LOCAL_NETWORK
    {
        errors.push(format!(
            "default_network '{}' is not defined",
            config.default_network
        ));
    }

    for (name, net) in &config.networks {
        if net.submit_timeout_secs == 0 {
            errors.push(format!("network '{}' has zero submit_timeout_secs", name));
        }
        if net.confirmations == 0 {
            errors.push(format!("network '{}' requires at least 1 confirmation", name));
        }
    }

    errors
}
