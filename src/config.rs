use crate::error::{Result, WardenError};
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Main configuration structure for the warden process.
///
/// This is the operator-facing TOML file (pool sizes, paths, sampling
/// defaults). It is distinct from the key-value configuration stored in the
/// database, which is per-user and served over the config-sync protocol.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Activity sampling configuration
    pub sampling: SamplingConfig,

    /// Retry configuration
    pub retry: RetryConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum connection pool size
    pub max_connections: u32,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u32,

    /// Path to database file (relative to data directory)
    pub path: String,
}

/// Activity sampling configuration.
///
/// `interval_seconds` is the fallback when neither a per-user nor a global
/// `sample_interval` key exists in the database config; `grace_seconds` is
/// the fixed tolerance added on top before a gap between two samples is
/// considered unbillable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Expected client polling period in seconds
    pub interval_seconds: i64,

    /// Extra tolerance before a gap is discarded
    pub grace_seconds: i64,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Database operation retry configuration
    pub db_ops: RetrySettings,
}

/// Individual retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Backoff factor (multiplier for each retry)
    pub backoff_factor: f32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            max_connections: 5,
            busy_timeout_ms: 10000,
            path: "warden.db".to_string(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            interval_seconds: 60,
            grace_seconds: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            db_ops: RetrySettings {
                max_attempts: 5,
                initial_delay_ms: 50,
                max_delay_ms: 2000,
                backoff_factor: 1.5,
            },
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_factor: 2.0,
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults
    pub fn load() -> Result<Self> {
        if let Some(config_path) = Self::find_config_file() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| WardenError::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| WardenError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| WardenError::config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Find the config file in standard locations.
    ///
    /// Search order: `TIMEWARDEN_CONFIG` env var, then
    /// `~/.config/timewarden/config.toml`, then `~/.timewarden.toml`.
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("TIMEWARDEN_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            warn!("TIMEWARDEN_CONFIG points at a missing file: {:?}", path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("timewarden").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".timewarden.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Default path for a generated config file
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| WardenError::config("Cannot determine config directory"))?;
        Ok(config_dir.join("timewarden").join("config.toml"))
    }

    /// Example TOML with all settings at their defaults
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| "# failed to render defaults".to_string())
    }
}

/// Get the process-wide configuration, loading it on first access.
pub fn get_config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| {
        Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        })
    })
}
