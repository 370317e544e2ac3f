use pkg_constants::controller::{
    DEFAULT_MAX_SUBNAMESPACES, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_REQUEUE_SECS, DEFAULT_ROOT_DEPTH,
};
use pkg_constants::paths::DEFAULT_DATA_DIR;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::limitrange::LimitRangeSpec;

/// Manager configuration file (YAML).
///
/// Example `hns.yaml`:
/// ```yaml
/// data-dir: /var/lib/k3rs/data
/// max-subnamespaces: 250
/// root-depth: 1
/// no-webhooks: false
/// resource-pool-only: false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HnsConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "max-subnamespaces")]
    pub max_subnamespaces: Option<usize>,
    #[serde(default, alias = "no-webhooks")]
    pub no_webhooks: Option<bool>,
    #[serde(default, alias = "resource-pool-only")]
    pub resource_pool_only: Option<bool>,
    #[serde(default, alias = "root-depth")]
    pub root_depth: Option<u32>,
    #[serde(default, alias = "poll-attempts")]
    pub poll_attempts: Option<u32>,
    #[serde(default, alias = "poll-interval-ms")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, alias = "requeue-secs")]
    pub requeue_secs: Option<u64>,
    #[serde(default, alias = "default-limits")]
    pub default_limits: Option<LimitRangeSpec>,
}

/// Resolved runtime configuration shared by admission and controllers.
#[derive(Debug, Clone)]
pub struct HnsConfig {
    pub data_dir: String,
    /// Ceiling on the namespaces sharing one enforcement root.
    pub max_subnamespaces: usize,
    /// When set, admission checks always allow.
    pub no_webhooks: bool,
    /// When set, every new subnamespace is created as a resource pool.
    pub resource_pool_only: bool,
    /// Subnamespaces at or above this depth get a namespace-local quota.
    pub root_depth: u32,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub requeue_interval: Duration,
    pub default_limits: LimitRangeSpec,
}

impl Default for HnsConfig {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            max_subnamespaces: DEFAULT_MAX_SUBNAMESPACES,
            no_webhooks: false,
            resource_pool_only: false,
            root_depth: DEFAULT_ROOT_DEPTH,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_SECS),
            default_limits: LimitRangeSpec::default(),
        }
    }
}

impl HnsConfig {
    /// Fill unset file values with defaults.
    pub fn from_file(file: HnsConfigFile) -> Self {
        let d = HnsConfig::default();
        Self {
            data_dir: file.data_dir.unwrap_or(d.data_dir),
            max_subnamespaces: file.max_subnamespaces.unwrap_or(d.max_subnamespaces),
            no_webhooks: file.no_webhooks.unwrap_or(d.no_webhooks),
            resource_pool_only: file.resource_pool_only.unwrap_or(d.resource_pool_only),
            root_depth: file.root_depth.unwrap_or(d.root_depth),
            poll_attempts: file.poll_attempts.unwrap_or(d.poll_attempts),
            poll_interval: file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.poll_interval),
            requeue_interval: file
                .requeue_secs
                .map(Duration::from_secs)
                .unwrap_or(d.requeue_interval),
            default_limits: file.default_limits.unwrap_or(d.default_limits),
        }
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
