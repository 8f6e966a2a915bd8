//! Configuration loading and data folder resolution
//!
//! Both services resolve their bootstrap settings in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is not an error: the module logs a warning and starts
//! with compiled defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data folder
pub const ROOT_FOLDER_ENV: &str = "VIVO_ROOT_FOLDER";

/// Logging configuration shared by all modules
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Data folder resolution following the four-tier priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get OS-dependent default data folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/vivo (or /var/lib/vivo for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("vivo"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/vivo"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("vivo"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/vivo"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("vivo"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\vivo"))
    } else {
        PathBuf::from("./vivo_data")
    }
}

/// Candidate locations of `<module>.toml`, most specific first
fn config_file_candidates(module_name: &str) -> Vec<PathBuf> {
    let file_name = format!("{}.toml", module_name);
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("vivo").join(&file_name));
    }
    if cfg!(unix) {
        candidates.push(PathBuf::from("/etc/vivo").join(&file_name));
    }
    candidates
}

/// Load a module's TOML bootstrap configuration
///
/// An explicitly requested file must exist and parse. Without an explicit
/// path the platform locations are searched and compiled defaults are used
/// when none exists.
pub fn load_toml_config<T>(explicit: Option<&Path>, module_name: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if let Some(path) = explicit {
        return parse_toml_file(path);
    }

    for candidate in config_file_candidates(module_name) {
        if candidate.exists() {
            info!("Loading configuration from {}", candidate.display());
            return parse_toml_file(&candidate);
        }
    }

    warn!(
        module = module_name,
        "No configuration file found, using compiled defaults"
    );
    Ok(T::default())
}

fn parse_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
}
