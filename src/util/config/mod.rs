//! cosim configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (COSIM_MODE_OVERRIDE, COSIM_LOG)
//! 3. Project-level (cosim.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use cosim::util::config::{self, RuntimeConfig};
//!
//! let config = config::load_config_or_default().unwrap_or_default();
//! config::install(config);
//! assert!(config::global().log_level.len() > 0);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::invoker::InvokeMode;
use crate::util::logger::LogLevel;

/// Project-level config file name.
pub const CONFIG_FILE: &str = "cosim.toml";
/// Environment variable holding a packed mode override.
pub const ENV_MODE_OVERRIDE: &str = "COSIM_MODE_OVERRIDE";
/// Environment variable holding the log level.
pub const ENV_LOG: &str = "COSIM_LOG";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Run hardware invocations in a forked child by default
    #[serde(default = "default_run_in_new_process")]
    pub run_in_new_process: bool,
    /// Packed mode forced onto every new task (`> 0` sequential, `0` join, `< 0` detach)
    #[serde(default)]
    pub mode_override: Option<i32>,
    /// Log level name
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_run_in_new_process() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_in_new_process: true,
            mode_override: None,
            log_level: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Mode override as an [`InvokeMode`].
    pub fn mode_override(&self) -> Option<InvokeMode> {
        self.mode_override.map(InvokeMode::from_raw)
    }

    /// Parsed log level, falling back to INFO for unknown names.
    pub fn log_level(&self) -> LogLevel {
        self.log_level.parse().unwrap_or(LogLevel::Info)
    }

    /// Apply environment overrides to this config.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(
            std::env::var(ENV_MODE_OVERRIDE).ok().as_deref(),
            std::env::var(ENV_LOG).ok().as_deref(),
        )
    }

    fn with_overrides(
        mut self,
        mode: Option<&str>,
        log: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = mode {
            let mode: InvokeMode = raw.parse().map_err(|_| ConfigError::Env {
                var: ENV_MODE_OVERRIDE,
                value: raw.to_string(),
            })?;
            self.mode_override = Some(mode.as_raw());
        }
        if let Some(level) = log {
            level.parse::<LogLevel>().map_err(|_| ConfigError::Env {
                var: ENV_LOG,
                value: level.to_string(),
            })?;
            self.log_level = level.trim().to_ascii_lowercase();
        }
        Ok(self)
    }
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
    #[error("invalid value `{value}` for {var}")]
    Env { var: &'static str, value: String },
}

/// Path of the project-level config file.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE)
}

/// Load a config file. Environment overrides are not applied.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load `cosim.toml` from the working directory if it exists, then apply
/// environment overrides.
pub fn load_config_or_default() -> Result<RuntimeConfig, ConfigError> {
    let path = default_config_path();
    let config = if path.exists() {
        load_config(&path)?
    } else {
        RuntimeConfig::default()
    };
    config.with_env()
}

/// Save a config file, creating parent directories.
pub fn save_config(
    config: &RuntimeConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

static GLOBAL: Lazy<RwLock<RuntimeConfig>> = Lazy::new(|| {
    RwLock::new(
        RuntimeConfig::default()
            .with_env()
            .unwrap_or_else(|_| RuntimeConfig::default()),
    )
});

/// Install the process-wide configuration.
pub fn install(config: RuntimeConfig) {
    *GLOBAL.write() = config;
}

/// Snapshot of the process-wide configuration.
pub fn global() -> RuntimeConfig {
    GLOBAL.read().clone()
}
