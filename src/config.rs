//! Configuration loading for `swarm-core`: discovery, parsing, and a
//! nested-struct-with-defaults shape for the sections this crate has
//! (storage, retry, heartbeat, lease, gates, embeddings).

use crate::error::{Error, Result};
use crate::quality::QualityGate;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(default)]
    pub gates: GateConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            storage: StorageConfig::default(),
            retry: RetryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            lease: LeaseConfig::default(),
            gates: GateConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Where the task/lease/message/memory/quality/agent tables live, and how
/// many times a transaction retries on a transient `sqlx` error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_transaction_retries")]
    pub transaction_retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path(), transaction_retries: default_transaction_retries() }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("swarm.db")
}

fn default_transaction_retries() -> u32 {
    3
}

/// Retry backoff for failed tasks: a fixed exponential schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { backoff_base_secs: default_backoff_base_secs(), max_retries: default_max_retries() }
    }
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    crate::task::DEFAULT_MAX_RETRIES
}

/// How often agents are expected to heartbeat, and the multiplier applied
/// to the interval to decide when one is stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_stale_multiplier")]
    pub stale_multiplier: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: default_heartbeat_interval_secs(), stale_multiplier: default_stale_multiplier() }
    }
}

impl HeartbeatConfig {
    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.interval_secs as f64 * self.stale_multiplier * 1000.0) as i64)
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_stale_multiplier() -> f64 {
    3.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { default_ttl_secs: default_lease_ttl_secs() }
    }
}

impl LeaseConfig {
    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_ttl_secs as i64)
    }
}

fn default_lease_ttl_secs() -> u64 {
    900
}

/// Quality gates applied after a snapshot is recorded. Defaults to
/// `quality::default_gates()`; entirely overridable in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_gates_vec")]
    pub gates: Vec<QualityGate>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { gates: default_gates_vec() }
    }
}

fn default_gates_vec() -> Vec<QualityGate> {
    crate::quality::default_gates()
}

/// Which embedding provider the memory store's semantic search uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub model: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { provider: default_embedding_provider(), dimension: default_embedding_dimension(), endpoint: None, model: None }
    }
}

fn default_embedding_provider() -> String {
    "none".to_string()
}

fn default_embedding_dimension() -> usize {
    768
}

/// Where `ConfigLoader::default()` looks for a config file, in order.
#[derive(Debug, Clone)]
pub enum ConfigDiscoveryStrategy {
    /// `./.swarm/config.toml`, then `dirs::config_dir()/swarm-core/config.toml`,
    /// then the `SWARM_CONFIG` environment variable.
    Default,
    Explicit(PathBuf),
    EnvironmentOnly,
}

pub struct ConfigLoader {
    strategy: ConfigDiscoveryStrategy,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self { strategy: ConfigDiscoveryStrategy::Default }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { strategy: ConfigDiscoveryStrategy::Explicit(path) }
    }

    pub fn env_only() -> Self {
        Self { strategy: ConfigDiscoveryStrategy::EnvironmentOnly }
    }

    fn discover_path(&self) -> Option<PathBuf> {
        match &self.strategy {
            ConfigDiscoveryStrategy::Explicit(path) => Some(path.clone()),
            ConfigDiscoveryStrategy::EnvironmentOnly => env::var("SWARM_CONFIG").ok().map(PathBuf::from),
            ConfigDiscoveryStrategy::Default => {
                let local = PathBuf::from(".swarm/config.toml");
                if local.exists() {
                    debug!(path = ?local, "found local config");
                    return Some(local);
                }
                if let Some(dir) = dirs::config_dir() {
                    let candidate = dir.join("swarm-core").join("config.toml");
                    if candidate.exists() {
                        debug!(path = ?candidate, "found user config");
                        return Some(candidate);
                    }
                }
                if let Ok(path) = env::var("SWARM_CONFIG") {
                    let candidate = PathBuf::from(path);
                    if candidate.exists() {
                        debug!(path = ?candidate, "found config via SWARM_CONFIG");
                        return Some(candidate);
                    }
                    warn!(path = %candidate.display(), "SWARM_CONFIG points to a nonexistent file");
                }
                None
            }
        }
    }

    /// Loads and parses the discovered config file, or returns
    /// `SwarmConfig::default()` if none was found.
    pub fn load(&self) -> Result<SwarmConfig> {
        match self.discover_path() {
            Some(path) => self.load_from(&path),
            None => {
                debug!("no config file found, using defaults");
                Ok(SwarmConfig::default())
            }
        }
    }

    pub fn load_from(&self, path: &Path) -> Result<SwarmConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| Error::validation(format!("failed to read config file {}: {err}", path.display())))?;
        let config: SwarmConfig = toml::from_str(&contents)
            .map_err(|err| Error::validation(format!("failed to parse config file {}: {err}", path.display())))?;
        debug!(path = ?path, version = %config.version, "loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = SwarmConfig::default();
        assert_eq!(config.retry.max_retries, crate::task::DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry.backoff_base_secs, 30);
        assert_eq!(config.gates.gates.len(), crate::quality::default_gates().len());
    }

    #[test]
    fn load_from_parses_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "version = \"2.0.0\"\n[storage]\ntransaction_retries = 7\n").unwrap();
        let config = ConfigLoader::new().load_from(&path).unwrap();
        assert_eq!(config.version, "2.0.0");
        assert_eq!(config.storage.transaction_retries, 7);
        assert_eq!(config.retry.max_retries, crate::task::DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn heartbeat_stale_threshold_applies_multiplier() {
        let config = HeartbeatConfig { interval_secs: 30, stale_multiplier: 3.0 };
        assert_eq!(config.stale_threshold(), chrono::Duration::seconds(90));
    }
}
