//! Resume requests and where they go

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ProcessKey, QueueStore, StoreResult};

/// Submitted when a waiting process's conditions resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub process_key: ProcessKey,
    pub satisfied_events: BTreeSet<String>,
}

/// Process-management boundary the watchdog resumes through
#[async_trait]
pub trait ProcessResumer: Send + Sync {
    /// Returns false if the process was no longer suspended
    async fn resume(&self, request: &ResumeRequest) -> StoreResult<bool>;
}

/// Resumes by moving the queue entry from SUSPENDED back to ENQUEUED
pub struct QueueResumer {
    queue: Arc<dyn QueueStore>,
}

impl QueueResumer {
    pub fn new(queue: Arc<dyn QueueStore>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ProcessResumer for QueueResumer {
    async fn resume(&self, request: &ResumeRequest) -> StoreResult<bool> {
        debug!(key = %request.process_key, events = ?request.satisfied_events, "QueueResumer::resume: called");
        self.queue.resume(&request.process_key, &request.satisfied_events).await
    }
}
