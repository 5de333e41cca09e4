//! Latest evaluated state per pool

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::scaler::ScaleDirection;

/// Outcome of one pool evaluation; `target_size` is what reconciliation converges to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    pub pool: String,
    pub current_size: u32,
    pub queue_size: u32,
    pub target_size: u32,
    pub direction: ScaleDirection,
    pub evaluated_at: DateTime<Utc>,
}

/// Shared view of every pool's latest target
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: DashMap<String, PoolState>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pool: &str) -> Option<PoolState> {
        self.pools.get(pool).map(|s| s.value().clone())
    }

    pub fn target_size(&self, pool: &str) -> Option<u32> {
        self.pools.get(pool).map(|s| s.target_size)
    }

    pub fn update(&self, state: PoolState) {
        self.pools.insert(state.pool.clone(), state);
    }

    /// All pools, sorted by name
    pub fn snapshot(&self) -> Vec<PoolState> {
        let mut states: Vec<PoolState> = self.pools.iter().map(|s| s.value().clone()).collect();
        states.sort_by(|a, b| a.pool.cmp(&b.pool));
        states
    }
}
