//! Application configuration loading and validation.
//!
//! Configuration lives in a TOML file with three sections: `[storage]` for
//! the database, `[registry]` for the home registry core, and `[logging]`.
//! A missing file is created with defaults on first run.

use hearth_registry::RegistryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_database_path() -> String {
    "homes.db".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Number of pooled database connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pool_size: default_pool_size(),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to emit logs as JSON
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Home registry core settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Loads configuration from a TOML file, creating a default file if
    /// none exists.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded (or freshly created) configuration, or an error if the
    /// file could not be read, written, or parsed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the merged configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())` if every setting is usable, or a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.storage.database_path.is_empty() {
            return Err("storage.database_path must not be empty".to_string());
        }
        if self.storage.pool_size == 0 {
            return Err("storage.pool_size must be at least 1".to_string());
        }
        if self.registry.flush_retry_max_attempts == 0 {
            return Err("registry.flush_retry_max_attempts must be at least 1".to_string());
        }
        if self.registry.flush_interval_ms == 0 {
            return Err("registry.flush_interval_ms must be greater than 0".to_string());
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}
