//! Target size computation

use serde::{Deserialize, Serialize};

use super::config::AutoscalerConfig;

/// Which way an evaluation moved the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
    Hold,
}

impl std::fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleDecision {
    pub target: u32,
    pub direction: ScaleDirection,
}

/// Desired pool size from the current size and the queue depth
///
/// Grows by `ceil(current * percent_increment / 100)` (at least one) when the
/// queue exceeds `current * increment_threshold_factor`, shrinks by the
/// decrement percentage (at least one, never below `min_pool_size`) when it
/// falls under `current * decrement_threshold_factor`, and holds otherwise.
/// An empty pool only grows once something is queued.
pub fn compute_target(current: u32, queue: u32, config: &AutoscalerConfig) -> ScaleDecision {
    let size = f64::from(current);
    let depth = f64::from(queue);
    let growth_threshold = size * config.increment_threshold_factor;
    let shrink_threshold = size * config.decrement_threshold_factor;

    let target = if depth > growth_threshold {
        let grown = current.saturating_add(step(current, config.percent_increment));
        match config.max_pool_size {
            Some(max) if current >= max => current,
            Some(max) if depth > f64::from(max) * config.increment_threshold_factor => max,
            Some(max) => grown.min(max),
            None => grown,
        }
    } else if depth < shrink_threshold {
        current
            .saturating_sub(step(current, config.percent_decrement))
            .max(config.min_pool_size)
    } else {
        current
    };

    let direction = match target.cmp(&current) {
        std::cmp::Ordering::Greater => ScaleDirection::Up,
        std::cmp::Ordering::Less => ScaleDirection::Down,
        std::cmp::Ordering::Equal => ScaleDirection::Hold,
    };
    ScaleDecision { target, direction }
}

fn step(current: u32, percent: f64) -> u32 {
    let delta = (f64::from(current) * percent / 100.0).ceil();
    // Saturating float-to-int cast
    (delta as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table_config() -> AutoscalerConfig {
        AutoscalerConfig {
            percent_increment: 50.0,
            percent_decrement: 10.0,
            increment_threshold_factor: 1.5,
            decrement_threshold_factor: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_convergence_table() {
        let config = table_config();
        let cases = [(1, 0, 1), (1, 10, 2), (2, 10, 3), (3, 10, 5), (5, 10, 8), (8, 0, 7), (7, 0, 6)];
        for (current, queue, expected) in cases {
            assert_eq!(
                compute_target(current, queue, &config).target,
                expected,
                "current={} queue={}",
                current,
                queue
            );
        }
    }

    #[test]
    fn test_empty_pool_stays_dormant_without_work() {
        let config = table_config();
        assert_eq!(
            compute_target(0, 0, &config),
            ScaleDecision {
                target: 0,
                direction: ScaleDirection::Hold
            }
        );
        assert_eq!(compute_target(0, 1, &config).target, 1);
    }

    #[test]
    fn test_hold_between_thresholds() {
        let config = table_config();
        // growth threshold 6, shrink threshold 4
        let decision = compute_target(4, 5, &config);
        assert_eq!(decision.target, 4);
        assert_eq!(decision.direction, ScaleDirection::Hold);
    }

    #[test]
    fn test_min_pool_size_floor() {
        let config = AutoscalerConfig {
            min_pool_size: 3,
            ..table_config()
        };
        assert_eq!(compute_target(3, 0, &config).target, 3);
        assert_eq!(compute_target(4, 0, &config).target, 3);
    }

    #[test]
    fn test_max_pool_size() {
        let config = AutoscalerConfig {
            max_pool_size: Some(6),
            ..table_config()
        };
        // Clamped growth: 5 + 3 -> 6
        assert_eq!(compute_target(5, 8, &config).target, 6);
        // Queue above max * factor (9) jumps straight to max
        assert_eq!(compute_target(1, 10, &config).target, 6);
        // Already at max
        assert_eq!(compute_target(6, 100, &config).direction, ScaleDirection::Hold);
    }

    proptest! {
        #[test]
        fn prop_direction_agrees_with_target(current in 0u32..500, queue in 0u32..2000) {
            let decision = compute_target(current, queue, &table_config());
            match decision.direction {
                ScaleDirection::Up => prop_assert!(decision.target > current),
                ScaleDirection::Down => prop_assert!(decision.target < current),
                ScaleDirection::Hold => prop_assert_eq!(decision.target, current),
            }
        }

        #[test]
        fn prop_shrink_never_below_floor(current in 1u32..500) {
            let decision = compute_target(current, 0, &table_config());
            prop_assert!(decision.target >= 1);
        }

        #[test]
        fn prop_growth_respects_max(current in 0u32..50, queue in 0u32..2000, max in 1u32..50) {
            let config = AutoscalerConfig { max_pool_size: Some(max), ..table_config() };
            let decision = compute_target(current, queue, &config);
            if decision.direction == ScaleDirection::Up {
                prop_assert!(decision.target <= max);
            }
        }
    }
}
