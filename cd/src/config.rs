//! Conductor configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};

use crate::autoscaler::ScalingConfig;
use crate::channel::ChannelConfig;
use crate::dispatcher::DispatcherConfig;
use crate::watchdog::WatchdogConfig;

const LOG_LEVELS: [&str; 6] = ["TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR"];

/// Main Conductor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR); `--log-level` wins over this
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Queue and wait-record storage
    pub storage: StorageConfig,

    /// Worker message channels
    pub channels: ChannelConfig,

    /// Process and command dispatch
    pub dispatcher: DispatcherConfig,

    /// Worker pool autoscaling
    pub autoscaler: ScalingConfig,

    /// Suspended-process watchdog
    pub watchdog: WatchdogConfig,
}

impl Config {
    /// Reject settings the loops cannot run with
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = &self.log_level {
            if !LOG_LEVELS.contains(&level.to_uppercase().as_str()) {
                return Err(eyre!("Unknown log-level '{}'", level));
            }
        }
        if self.channels.inbound_capacity == 0 || self.channels.outbound_capacity == 0 {
            return Err(eyre!("channels: capacities must be positive"));
        }
        if self.dispatcher.poll_interval_ms == 0 {
            return Err(eyre!("dispatcher: poll-interval-ms must be positive"));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(eyre!("dispatcher: batch-size must be positive"));
        }
        if self.autoscaler.interval_ms == 0 {
            return Err(eyre!("autoscaler: interval-ms must be positive"));
        }
        for (pool, scaling) in &self.autoscaler.pools {
            scaling
                .validate()
                .map_err(|reason| eyre!("autoscaler pool '{}': {}", pool, reason))?;
        }
        if self.watchdog.period_ms == 0 {
            return Err(eyre!("watchdog: period-ms must be positive"));
        }
        if self.watchdog.page_size == 0 {
            return Err(eyre!("watchdog: page-size must be positive"));
        }
        if self.watchdog.status_query_limit == 0 {
            return Err(eyre!("watchdog: status-query-limit must be positive"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.conductor.yml`, then
    /// `~/.config/conductor/conductor.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::default_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are ignored here; `load` reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::default_paths().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".conductor.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("conductor").join("conductor.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit
    Memory,
    #[default]
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// SQLite database file
    pub path: PathBuf,

    /// Database still holding wait records from before a migration; read
    /// alongside `path` until drained
    #[serde(rename = "legacy-wait-path", skip_serializing_if = "Option::is_none")]
    pub legacy_wait_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/conductor on Linux)
        let path = dirs::data_dir()
            .map(|d| d.join("conductor"))
            .unwrap_or_else(|| PathBuf::from(".conductor"))
            .join("queue.db");

        Self {
            backend: StorageBackend::Sqlite,
            path,
            legacy_wait_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.dispatcher.batch_size, 100);
        assert_eq!(config.watchdog.page_size, 100);
        assert!(config.autoscaler.pools.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

storage:
  backend: memory

dispatcher:
  poll-interval-ms: 250
  batch-size: 20

autoscaler:
  interval-ms: 5000
  pools:
    default:
      percent-increment: 25
      min-pool-size: 2

watchdog:
  page-size: 50
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.dispatcher.batch_size, 20);
        assert_eq!(config.autoscaler.pools["default"].percent_increment, 25.0);
        assert_eq!(config.autoscaler.pools["default"].min_pool_size, 2);
        assert_eq!(config.watchdog.page_size, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("watchdog:\n  period-ms: 1000\n").unwrap();

        assert_eq!(config.watchdog.period_ms, 1000);
        assert_eq!(config.watchdog.page_size, 100);
        assert_eq!(config.channels, ChannelConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.watchdog.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = Some("LOUD".to_string());
        assert!(config.validate().is_err());

        let yaml = r#"
autoscaler:
  pools:
    gpu:
      min-pool-size: 4
      max-pool-size: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gpu"));
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log-level: WARN\nwatchdog:\n  page-size: 7").unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.watchdog.page_size, 7);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("WARN"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/conductor.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
