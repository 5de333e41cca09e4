//! Autoscaler configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Capabilities;

/// Scaling knobs for one worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    /// Growth step as a percentage of the current size
    #[serde(rename = "percent-increment", default = "default_percent_increment")]
    pub percent_increment: f64,

    /// Shrink step as a percentage of the current size
    #[serde(rename = "percent-decrement", default = "default_percent_decrement")]
    pub percent_decrement: f64,

    /// Grow when the queue exceeds `current * factor`
    #[serde(rename = "increment-threshold-factor", default = "default_increment_threshold_factor")]
    pub increment_threshold_factor: f64,

    /// Shrink when the queue is below `current * factor`
    #[serde(rename = "decrement-threshold-factor", default = "default_decrement_threshold_factor")]
    pub decrement_threshold_factor: f64,

    /// Floor for shrinking
    #[serde(rename = "min-pool-size", default = "default_min_pool_size")]
    pub min_pool_size: u32,

    /// Optional ceiling for growing
    #[serde(rename = "max-pool-size", default)]
    pub max_pool_size: Option<u32>,

    /// Max ENQUEUED entries inspected when measuring queue depth
    #[serde(rename = "queue-query-limit", default = "default_queue_query_limit")]
    pub queue_query_limit: usize,

    /// Capabilities the pool's workers offer; entries accepting them count toward depth
    #[serde(default)]
    pub selector: Capabilities,
}

fn default_percent_increment() -> f64 {
    50.0
}

fn default_percent_decrement() -> f64 {
    10.0
}

fn default_increment_threshold_factor() -> f64 {
    1.5
}

fn default_decrement_threshold_factor() -> f64 {
    1.0
}

fn default_min_pool_size() -> u32 {
    1
}

fn default_queue_query_limit() -> usize {
    300
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        debug!("AutoscalerConfig::default: called");
        Self {
            percent_increment: default_percent_increment(),
            percent_decrement: default_percent_decrement(),
            increment_threshold_factor: default_increment_threshold_factor(),
            decrement_threshold_factor: default_decrement_threshold_factor(),
            min_pool_size: default_min_pool_size(),
            max_pool_size: None,
            queue_query_limit: default_queue_query_limit(),
            selector: Capabilities::new(),
        }
    }
}

impl AutoscalerConfig {
    /// Check the knobs make sense together
    pub fn validate(&self) -> Result<(), String> {
        let knobs = [
            ("percent-increment", self.percent_increment),
            ("percent-decrement", self.percent_decrement),
            ("increment-threshold-factor", self.increment_threshold_factor),
            ("decrement-threshold-factor", self.decrement_threshold_factor),
        ];
        for (name, value) in knobs {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a non-negative number, got {}", name, value));
            }
        }
        if let Some(max) = self.max_pool_size.filter(|max| *max < self.min_pool_size) {
            return Err(format!(
                "max-pool-size ({}) is below min-pool-size ({})",
                max, self.min_pool_size
            ));
        }
        if self.queue_query_limit == 0 {
            return Err("queue-query-limit must be positive".to_string());
        }
        Ok(())
    }
}

/// Autoscaler loop settings and the pools it manages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Time between evaluations in milliseconds
    #[serde(rename = "interval-ms", default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Pools by name
    #[serde(default)]
    pub pools: BTreeMap<String, AutoscalerConfig>,
}

fn default_interval_ms() -> u64 {
    15_000
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            pools: BTreeMap::new(),
        }
    }
}

impl ScalingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AutoscalerConfig::default();
        assert_eq!(config.percent_increment, 50.0);
        assert_eq!(config.percent_decrement, 10.0);
        assert_eq!(config.min_pool_size, 1);
        assert_eq!(config.max_pool_size, None);
        assert_eq!(config.queue_query_limit, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_min_above_max() {
        let config = AutoscalerConfig {
            min_pool_size: 5,
            max_pool_size: Some(2),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_factor() {
        let config = AutoscalerConfig {
            decrement_threshold_factor: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_pools() {
        let yaml = r#"
interval-ms: 1000
pools:
  gpu:
    max-pool-size: 10
    selector:
      flavor: gpu
"#;
        let config: ScalingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(1));
        let gpu = &config.pools["gpu"];
        assert_eq!(gpu.max_pool_size, Some(10));
        assert_eq!(gpu.selector["flavor"], "gpu");
        assert_eq!(gpu.percent_increment, 50.0);
    }
}
