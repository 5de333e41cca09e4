//! Autoscaler - periodic pool evaluation

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::ScalingConfig;
use super::error::AutoscaleError;
use super::inventory::{PoolInventory, QueueDepth, ReadinessPredicate, is_not_draining, is_scheduled};
use super::registry::{PoolRegistry, PoolState};
use super::scaler::{ScaleDirection, compute_target};
use crate::domain::QueueStore;

pub struct Autoscaler {
    config: ScalingConfig,
    inventory: Arc<dyn PoolInventory>,
    depth: QueueDepth,
    registry: Arc<PoolRegistry>,
    predicates: Vec<ReadinessPredicate>,
}

impl Autoscaler {
    /// Create an autoscaler counting workers that are scheduled and not draining
    pub fn new(
        config: ScalingConfig,
        inventory: Arc<dyn PoolInventory>,
        queue: Arc<dyn QueueStore>,
        registry: Arc<PoolRegistry>,
    ) -> Self {
        Self {
            config,
            inventory,
            depth: QueueDepth::new(queue),
            registry,
            predicates: vec![is_scheduled(), is_not_draining()],
        }
    }

    /// Replace the two readiness predicates
    pub fn with_predicates(mut self, first: ReadinessPredicate, second: ReadinessPredicate) -> Self {
        self.predicates = vec![first, second];
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Measure one pool and publish its new target
    ///
    /// On error nothing is published, so the registry keeps the previous target.
    pub async fn evaluate(&self, pool: &str) -> Result<PoolState, AutoscaleError> {
        debug!(%pool, "Autoscaler::evaluate: called");
        let config = self
            .config
            .pools
            .get(pool)
            .ok_or_else(|| AutoscaleError::UnknownPool(pool.to_string()))?;

        let workers = self.inventory.workers(pool).await?;
        let ready = workers
            .iter()
            .filter(|&w| self.predicates.iter().all(|ready| ready(w)))
            .count();
        let current_size = u32::try_from(ready).unwrap_or(u32::MAX);
        let queue_size = self.depth.count(&config.selector, config.queue_query_limit).await?;

        let decision = compute_target(current_size, queue_size, config);
        let state = PoolState {
            pool: pool.to_string(),
            current_size,
            queue_size,
            target_size: decision.target,
            direction: decision.direction,
            evaluated_at: Utc::now(),
        };

        if decision.direction != ScaleDirection::Hold {
            info!(
                %pool,
                current = current_size,
                queue = queue_size,
                target = decision.target,
                direction = %decision.direction,
                "Pool target changed"
            );
        }
        self.registry.update(state.clone());
        Ok(state)
    }

    /// Evaluate every configured pool; failures are logged and skipped
    pub async fn evaluate_all(&self) -> Vec<PoolState> {
        let mut states = Vec::with_capacity(self.config.pools.len());
        for pool in self.config.pools.keys() {
            match self.evaluate(pool).await {
                Ok(state) => states.push(state),
                Err(e) => {
                    warn!(%pool, error = %e, "Skipping pool evaluation, keeping previous target");
                }
            }
        }
        states
    }

    /// Run the evaluation loop until shutdown
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            interval_ms = self.config.interval_ms,
            pools = self.config.pools.len(),
            "Autoscaler started"
        );
        let mut interval = tokio::time::interval(self.config.interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.evaluate_all().await;
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("Autoscaler stopped");
    }
}
