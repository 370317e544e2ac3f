//! Filesystem path constants.

/// Default config file path for the manager.
pub const DEFAULT_CONFIG: &str = "/etc/k3rs/hns.yaml";

/// Default data directory for the state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/k3rs-data";
