//! Queue entries

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::{ProcessKey, now_ms, truncate_ms};
use super::status::ProcessStatus;

/// A process waiting in (or moving through) the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Process identity
    pub key: ProcessKey,

    /// Monotonic sequence id, assigned on insert; used for ordering and paging
    pub seq_id: i64,

    /// Current status
    pub status: ProcessStatus,

    /// Nested requirement map, e.g. `{"agent": {"flavor": ["default", "gpu-.*"]}}`
    pub requirements: Value,

    /// Opaque process payload handed to the worker on dispatch
    pub payload: Value,

    /// Earliest dispatch time
    pub start_at: Option<DateTime<Utc>>,

    /// Events that resumed the process, delivered with the next dispatch
    pub resume_events: BTreeSet<String>,

    /// Agent that claimed the entry
    pub agent_id: Option<String>,

    /// Bumped on every mutation
    pub version: i64,

    /// Last mutation time
    pub last_updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Whether a worker may be handed this entry at `now`
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.status == ProcessStatus::Enqueued && self.start_at.is_none_or(|at| at <= now)
    }
}

/// Values for a new queue entry
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub key: Option<ProcessKey>,
    pub requirements: Value,
    pub payload: Value,
    pub start_at: Option<DateTime<Utc>>,
}

impl NewEntry {
    /// Start an entry with no requirements
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-provided key instead of generating one
    pub fn with_key(mut self, key: ProcessKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the requirement map
    pub fn with_requirements(mut self, requirements: Value) -> Self {
        self.requirements = requirements;
        self
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Delay dispatch until `start_at`
    pub fn with_start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    /// Materialize the entry with its assigned sequence id
    pub(crate) fn into_entry(self, seq_id: i64) -> QueueEntry {
        QueueEntry {
            key: self.key.unwrap_or_default(),
            seq_id,
            status: ProcessStatus::Enqueued,
            requirements: self.requirements,
            payload: self.payload,
            start_at: self.start_at.map(truncate_ms),
            resume_events: BTreeSet::new(),
            agent_id: None,
            version: 0,
            last_updated_at: now_ms(),
        }
    }
}
