//! Autoscaler inputs: pool workers and queue depth

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::AutoscaleError;
use crate::channel::ChannelManager;
use crate::dispatcher::CompiledRequirements;
use crate::domain::{Capabilities, ProcessStatus, QueueStore};

/// What the autoscaler knows about one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub name: String,
    /// Placed and running
    pub scheduled: bool,
    /// Finishing up, will take no new work
    pub draining: bool,
}

/// Filter deciding whether a worker counts toward the current pool size
pub type ReadinessPredicate = Box<dyn Fn(&WorkerInfo) -> bool + Send + Sync>;

pub fn is_scheduled() -> ReadinessPredicate {
    Box::new(|w: &WorkerInfo| w.scheduled)
}

pub fn is_not_draining() -> ReadinessPredicate {
    Box::new(|w: &WorkerInfo| !w.draining)
}

/// Source of a pool's workers
#[async_trait]
pub trait PoolInventory: Send + Sync {
    async fn workers(&self, pool: &str) -> Result<Vec<WorkerInfo>, AutoscaleError>;
}

/// Inventory read from the channel manager: one worker per channel that joined the pool
pub struct ChannelInventory {
    channels: Arc<ChannelManager>,
}

impl ChannelInventory {
    pub fn new(channels: Arc<ChannelManager>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl PoolInventory for ChannelInventory {
    async fn workers(&self, pool: &str) -> Result<Vec<WorkerInfo>, AutoscaleError> {
        Ok(self
            .channels
            .channels()
            .into_iter()
            .filter(|c| c.pool() == Some(pool))
            .map(|c| WorkerInfo {
                name: c.worker_id().to_string(),
                scheduled: c.is_open(),
                draining: c.is_draining(),
            })
            .collect())
    }
}

/// Counts ENQUEUED entries a pool could run
pub struct QueueDepth {
    queue: Arc<dyn QueueStore>,
}

impl QueueDepth {
    pub fn new(queue: Arc<dyn QueueStore>) -> Self {
        Self { queue }
    }

    /// Entries (up to `limit`) whose requirements accept `selector`
    ///
    /// Store errors propagate; the caller skips the tick.
    pub async fn count(&self, selector: &Capabilities, limit: usize) -> Result<u32, AutoscaleError> {
        let entries = self.queue.list_by_status(ProcessStatus::Enqueued, limit).await?;
        let matching = entries
            .iter()
            .filter(|entry| match CompiledRequirements::compile(&entry.requirements) {
                Ok(compiled) => compiled.matches(selector),
                Err(e) => {
                    debug!(process = %entry.key, error = %e, "QueueDepth::count: skipping entry");
                    false
                }
            })
            .count();
        Ok(u32::try_from(matching).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::domain::{MemoryStore, NewEntry};
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_inventory_filters_by_pool() {
        let channels = Arc::new(ChannelManager::new(ChannelConfig::default()));
        channels.connect("a", Some("gpu".to_string())).unwrap();
        let b = channels.connect("b", Some("gpu".to_string())).unwrap();
        channels.connect("c", Some("cpu".to_string())).unwrap();
        channels.drain(b.channel_id());

        let inventory = ChannelInventory::new(channels);
        let mut workers = inventory.workers("gpu").await.unwrap();
        workers.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(workers.len(), 2);
        assert!(!workers[0].draining);
        assert!(workers[1].draining);
    }

    #[test]
    fn test_default_predicates() {
        let ready = WorkerInfo {
            name: "a".to_string(),
            scheduled: true,
            draining: false,
        };
        let draining = WorkerInfo {
            draining: true,
            ..ready.clone()
        };
        assert!(is_scheduled()(&ready));
        assert!(is_not_draining()(&ready));
        assert!(!is_not_draining()(&draining));
    }

    #[tokio::test]
    async fn test_queue_depth_counts_matching_entries() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(NewEntry::new().with_requirements(json!({"agent": {"flavor": "gpu"}})))
            .await
            .unwrap();
        store
            .insert(NewEntry::new().with_requirements(json!({"agent": {"flavor": "cpu"}})))
            .await
            .unwrap();
        store.insert(NewEntry::new()).await.unwrap();
        store
            .insert(NewEntry::new().with_requirements(json!({"agent": {"flavor": "(bad"}})))
            .await
            .unwrap();

        let depth = QueueDepth::new(store);
        let selector = Capabilities::from([("flavor".to_string(), "gpu".to_string())]);
        // gpu entry plus the unconstrained one
        assert_eq!(depth.count(&selector, 300).await.unwrap(), 2);
        assert_eq!(depth.count(&selector, 1).await.unwrap(), 1);
    }
}
