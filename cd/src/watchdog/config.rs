//! Watchdog configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the wait-condition watchdog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Time between polls in milliseconds
    #[serde(rename = "period-ms", default = "default_period_ms")]
    pub period_ms: u64,

    /// Waiting records fetched per poll
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: usize,

    /// Max process ids per status query when checking completion waits
    #[serde(rename = "status-query-limit", default = "default_status_query_limit")]
    pub status_query_limit: usize,

    /// Base delay after a failed poll in milliseconds
    #[serde(rename = "error-backoff-ms", default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Random extra delay added to the backoff, up to this many milliseconds
    #[serde(rename = "error-jitter-ms", default = "default_error_jitter_ms")]
    pub error_jitter_ms: u64,
}

fn default_period_ms() -> u64 {
    5_000
}

fn default_page_size() -> usize {
    100
}

fn default_status_query_limit() -> usize {
    500
}

fn default_error_backoff_ms() -> u64 {
    10_000
}

fn default_error_jitter_ms() -> u64 {
    2_000
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            page_size: default_page_size(),
            status_query_limit: default_status_query_limit(),
            error_backoff_ms: default_error_backoff_ms(),
            error_jitter_ms: default_error_jitter_ms(),
        }
    }
}

impl WatchdogConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Backoff after a failed poll, with `jitter_ms` already drawn
    pub fn error_backoff(&self, jitter_ms: u64) -> Duration {
        Duration::from_millis(self.error_backoff_ms.saturating_add(jitter_ms.min(self.error_jitter_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchdogConfig::default();
        assert_eq!(config.period(), Duration::from_secs(5));
        assert_eq!(config.page_size, 100);
        assert_eq!(config.status_query_limit, 500);
    }

    #[test]
    fn test_error_backoff_caps_jitter() {
        let config = WatchdogConfig {
            error_backoff_ms: 1_000,
            error_jitter_ms: 200,
            ..Default::default()
        };
        assert_eq!(config.error_backoff(50), Duration::from_millis(1_050));
        assert_eq!(config.error_backoff(5_000), Duration::from_millis(1_200));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: WatchdogConfig = serde_yaml::from_str("page-size: 10").unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.period_ms, 5_000);
    }
}
