//! Store traits
//!
//! Split by table so that components only depend on what they touch: the
//! dispatcher needs `QueueStore` and `CommandStore`, the watchdog needs
//! `WaitStore` and `QueueStore`.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::command::AgentCommand;
use super::entry::{NewEntry, QueueEntry};
use super::error::StoreResult;
use super::key::ProcessKey;
use super::status::ProcessStatus;
use super::wait::{WaitCondition, WaitingProcess};

/// Process queue
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert an ENQUEUED entry, assigning the next sequence id
    async fn insert(&self, entry: NewEntry) -> StoreResult<QueueEntry>;

    async fn get(&self, key: &ProcessKey) -> StoreResult<Option<QueueEntry>>;

    /// Dispatchable entries (ENQUEUED, `start_at` reached), oldest first
    async fn next_enqueued(&self, offset: usize, limit: usize) -> StoreResult<Vec<QueueEntry>>;

    /// Entries with `status`, oldest first
    async fn list_by_status(&self, status: ProcessStatus, limit: usize) -> StoreResult<Vec<QueueEntry>>;

    /// Move `key` from `expected` to `new`; `false` when the entry was not in `expected`
    async fn update_expected_status(
        &self,
        key: &ProcessKey,
        expected: ProcessStatus,
        new: ProcessStatus,
    ) -> StoreResult<bool>;

    /// ENQUEUED -> STARTING, recording the agent; `false` when someone else got there first
    async fn claim(&self, key: &ProcessKey, agent_id: &str) -> StoreResult<bool>;

    /// Current status per instance id; unknown ids map to `None`
    async fn find_statuses(&self, ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Option<ProcessStatus>>>;

    /// SUSPENDED -> ENQUEUED, recording the events that resumed the process
    async fn resume(&self, key: &ProcessKey, events: &BTreeSet<String>) -> StoreResult<bool>;
}

/// Waiting-process records
#[async_trait]
pub trait WaitStore: Send + Sync {
    /// Suspend an ENQUEUED or RUNNING entry on `waits`
    ///
    /// Fails with `InvalidState` for any other status. Re-suspending a
    /// process replaces its record and assigns a fresh sequence id.
    async fn suspend(&self, key: &ProcessKey, waits: Vec<WaitCondition>) -> StoreResult<WaitingProcess>;

    async fn get_wait(&self, key: &ProcessKey) -> StoreResult<Option<WaitingProcess>>;

    /// Records still waiting with a sequence id above `after_id`, ascending
    async fn next_wait_items(&self, after_id: Option<i64>, limit: usize) -> StoreResult<Vec<WaitingProcess>>;

    /// Replace the conditions of `key` if its version is still `expected_version`
    async fn set_wait(
        &self,
        key: &ProcessKey,
        waits: Vec<WaitCondition>,
        is_waiting: bool,
        expected_version: i64,
    ) -> StoreResult<bool>;

    /// Copy a record in from another store, keeping its conditions and version
    ///
    /// Returns `false` without writing when a record for the key already exists.
    async fn import_wait(&self, record: &WaitingProcess) -> StoreResult<bool>;
}

/// Agent commands
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn insert_command(&self, agent_id: &str, data: Value) -> StoreResult<AgentCommand>;

    /// CREATED commands, oldest first
    async fn next_commands(&self, offset: usize, limit: usize) -> StoreResult<Vec<AgentCommand>>;

    /// CREATED -> SENT
    async fn mark_sent(&self, command_id: &Uuid) -> StoreResult<bool>;

    /// SENT -> CREATED, for a command that never reached its agent
    async fn unmark_sent(&self, command_id: &Uuid) -> StoreResult<bool>;
}
