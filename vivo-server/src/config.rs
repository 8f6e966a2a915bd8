//! Bootstrap configuration for vivo-server
//!
//! Loaded from `vivo-server.toml`; command-line flags and environment
//! variables override individual fields (see `main.rs`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use vivo_common::config::LoggingConfig;

/// Module name used for config file lookup
pub const MODULE_NAME: &str = "vivo-server";

/// Database file name inside the data folder
pub const DATABASE_FILE: &str = "vivo.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Data folder (database lives here unless `database_path` is set)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit path to the SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Days of observations included in a pull snapshot
    #[serde(default = "default_pull_window_days")]
    pub pull_window_days: i64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            bind_address: default_bind_address(),
            port: default_port(),
            pull_window_days: default_pull_window_days(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Database file, defaulting to `<root_folder>/vivo.db`
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root_folder.join(DATABASE_FILE))
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_pull_window_days() -> i64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 5780);
        assert_eq!(config.pull_window_days, 30);
    }

    #[test]
    fn test_partial_toml_overrides_fields() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 6000
            pull_window_days = 14
            database_path = "/srv/vivo/study.db"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.pull_window_days, 14);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.database_path(Path::new("/ignored")),
            PathBuf::from("/srv/vivo/study.db")
        );
    }

    #[test]
    fn test_database_defaults_into_root_folder() {
        let config = ServerConfig::default();
        assert_eq!(
            config.database_path(Path::new("/data/vivo")),
            PathBuf::from("/data/vivo/vivo.db")
        );
    }
}
