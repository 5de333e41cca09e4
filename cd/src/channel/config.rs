//! Channel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-channel queue bounds and long-poll limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Max pending worker -> coordinator messages per channel
    #[serde(rename = "inbound-capacity", default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Max pending coordinator -> worker messages per channel
    #[serde(rename = "outbound-capacity", default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Upper bound on a single worker long poll, in milliseconds
    #[serde(rename = "max-poll-timeout-ms", default = "default_max_poll_timeout_ms")]
    pub max_poll_timeout_ms: u64,
}

fn default_inbound_capacity() -> usize {
    64
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_max_poll_timeout_ms() -> u64 {
    30_000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: default_inbound_capacity(),
            outbound_capacity: default_outbound_capacity(),
            max_poll_timeout_ms: default_max_poll_timeout_ms(),
        }
    }
}

impl ChannelConfig {
    pub fn max_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.max_poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.inbound_capacity, 64);
        assert_eq!(config.outbound_capacity, 64);
        assert_eq!(config.max_poll_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_yaml() {
        let config: ChannelConfig = serde_yaml::from_str("outbound-capacity: 4").unwrap();
        assert_eq!(config.outbound_capacity, 4);
        assert_eq!(config.inbound_capacity, 64);
    }
}
