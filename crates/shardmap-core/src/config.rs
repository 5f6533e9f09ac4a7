//! Configuration management for shardmap.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Placement group assigned to hosts that do not name one.
pub const DEFAULT_PLACEMENT_GROUP: &str = "0";

/// Main configuration for the shardmap tool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Cluster description.
    pub cluster: ClusterConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check that the configuration describes a usable cluster.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a negative k-factor or site count,
    /// duplicate host ids, or missing ids that name no configured host.
    pub fn validate(&self) -> crate::Result<()> {
        let cluster = &self.cluster;
        if cluster.k_factor < 0 {
            return Err(Error::validation(format!("k_factor must not be negative, got {}", cluster.k_factor)));
        }

        let mut ids = BTreeSet::new();
        for host in &cluster.hosts {
            if !ids.insert(host.id) {
                return Err(Error::validation(format!("duplicate host id {}", host.id)));
            }
            if host.sites < 0 {
                return Err(Error::validation(format!(
                    "host {} has a negative site count {}",
                    host.id, host.sites
                )));
            }
            if host.placement_group.is_empty() {
                return Err(Error::validation(format!("host {} has an empty placement group", host.id)));
            }
        }

        if let Some(id) = cluster.missing.iter().find(|id| !ids.contains(*id)) {
            return Err(Error::validation(format!("missing host {id} is not a configured host")));
        }
        Ok(())
    }
}

/// Cluster description: hosts, their failure domains and the replication level.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClusterConfig {
    /// Extra copies kept of every partition.
    pub k_factor: i32,
    /// Restore the layout hosts reported before a full restart.
    pub restore_partitions: bool,
    /// Ids of hosts that are members but currently unreachable.
    pub missing: Vec<u32>,
    /// Cluster members.
    pub hosts: Vec<HostConfig>,
}

impl ClusterConfig {
    /// Missing host ids as a set.
    #[must_use]
    pub fn missing_hosts(&self) -> BTreeSet<u32> {
        self.missing.iter().copied().collect()
    }
}

/// One cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Unique host id.
    pub id: u32,
    /// Placement group token, e.g. `"zone1.rack2"`.
    pub placement_group: String,
    /// Host address, used to order hosts within a placement group.
    pub ip_address: String,
    /// Number of sites the host runs.
    pub sites: i32,
    /// Partition ids the host held before a full restart.
    pub recovered_partitions: Vec<u32>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            id: 0,
            placement_group: DEFAULT_PLACEMENT_GROUP.to_string(),
            ip_address: String::new(),
            sites: 8,
            recovered_partitions: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}
