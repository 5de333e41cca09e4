//! Dispatcher configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Time between dispatch ticks in milliseconds
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Queue entries (or commands) fetched per page
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause after a failed tick in milliseconds
    #[serde(rename = "error-delay-ms", default = "default_error_delay_ms")]
    pub error_delay_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    debug!("default_poll_interval_ms: called");
    500
}

fn default_batch_size() -> usize {
    debug!("default_batch_size: called");
    100
}

fn default_error_delay_ms() -> u64 {
    debug!("default_error_delay_ms: called");
    5_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        debug!("DispatcherConfig::default: called");
        Self {
            poll_interval_ms: 500,
            batch_size: 100,
            error_delay_ms: 5_000,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.error_delay_ms)
    }
}
