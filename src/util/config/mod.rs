//! Platform configuration
//!
//! The scheduler reads its concurrency settings from the platform
//! configuration, a TOML file looked up once per process.
//!
//! # Lookup
//!
//! ```text
//! 1. $XDG_CONFIG_HOME/scriptfifo/config.toml
//! 2. $HOME/.config/scriptfifo/config.toml
//! 3. %APPDATA%/scriptfifo/config.toml
//! 4. Default values
//! ```
//!
//! # Example
//!
//! ```toml
//! [concurrency]
//! max_workers = 4
//! script_extension = "yx"
//!
//! [log]
//! level = "debug"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::util::logger::LogLevel;

/// Capability module every task instance requires before running its script.
pub const DEFAULT_CORE_MODULE: &str = "task.fifo";

/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Loaded on first access, never reloaded.
static PLATFORM: Lazy<PlatformConfig> = Lazy::new(|| match load_user_platform_config() {
    Ok(config) => config,
    Err(err) => {
        warn!("falling back to default platform config: {}", err);
        PlatformConfig::default()
    }
});

/// Process-wide platform configuration.
pub fn platform() -> &'static PlatformConfig {
    &PLATFORM
}

/// Platform-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlatformConfig {
    /// Task scheduler settings
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

impl PlatformConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Render as TOML text.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Task scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcurrencyConfig {
    /// Initial ceiling on simultaneously live workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Script references ending in `.{script_extension}` run as files,
    /// everything else resolves as a module
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    /// Module loaded into every instance before the task's script
    #[serde(default = "default_core_module")]
    pub core_module: String,
    /// Name given to execution contexts created by `start`
    #[serde(default = "default_core_module")]
    pub context_name: String,
    /// Worker thread name prefix
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Worker thread stack size in bytes
    #[serde(default)]
    pub stack_size: Option<usize>,
}

fn default_max_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_script_extension() -> String {
    "yx".to_string()
}

fn default_core_module() -> String {
    DEFAULT_CORE_MODULE.to_string()
}

fn default_thread_name() -> String {
    "fifo-worker".to_string()
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            script_extension: default_script_extension(),
            core_module: default_core_module(),
            context_name: default_core_module(),
            thread_name: default_thread_name(),
            stack_size: None,
        }
    }
}

impl ConcurrencyConfig {
    /// Default settings with a fixed worker ceiling.
    pub fn with_max_workers(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Self::default()
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Minimum level written
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Get the config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("scriptfifo"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("scriptfifo"));
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("scriptfifo"));
    }

    None
}

/// Get the config file path
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Load configuration from `path`
pub fn load_platform_config(path: &Path) -> Result<PlatformConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    PlatformConfig::from_toml_str(&content)
}

/// Load the user's configuration, or defaults if there is none
pub fn load_user_platform_config() -> Result<PlatformConfig, ConfigError> {
    match get_config_path() {
        Some(path) if path.exists() => load_platform_config(&path),
        _ => Ok(PlatformConfig::default()),
    }
}

/// Save configuration to `path`, creating parent directories
pub fn save_platform_config(
    config: &PlatformConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    fs::write(path, config.to_toml_string()?)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
