//! Bootstrap configuration for vivo-field
//!
//! Loaded from `vivo-field.toml`; command-line flags override individual
//! fields (see `main.rs`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vivo_common::config::LoggingConfig;

/// Module name used for config file lookup
pub const MODULE_NAME: &str = "vivo-field";

/// Local store file name inside the data folder
pub const DATABASE_FILE: &str = "vivo-field.db";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FieldConfig {
    /// Base URL of the vivo-server instance
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit path to the local store
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Seconds between scheduled sync passes while online
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Upper bound for the delay after failed passes
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Seconds between health probes
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            root_folder: None,
            database_path: None,
            sync_interval_secs: default_sync_interval_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FieldConfig {
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root_folder.join(DATABASE_FILE))
    }

    pub fn sync_interval(&self) -> Duration {
        vivo_common::time::secs_to_duration(self.sync_interval_secs.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        vivo_common::time::secs_to_duration(self.max_backoff_secs.max(self.sync_interval_secs).max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        vivo_common::time::secs_to_duration(self.probe_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        vivo_common::time::secs_to_duration(self.request_timeout_secs.max(1))
    }
}

fn default_server_url() -> String {
    "http://127.0.0.1:5780".to_string()
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    15
}
