//! In-memory store backend

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::command::{AgentCommand, CommandStatus};
use super::entry::{NewEntry, QueueEntry};
use super::error::{StoreError, StoreResult};
use super::key::{ProcessKey, now_ms};
use super::status::ProcessStatus;
use super::store::{CommandStore, QueueStore, WaitStore};
use super::wait::{WaitCondition, WaitingProcess};

#[derive(Default)]
struct QueueTable {
    last_seq: i64,
    entries: BTreeMap<i64, QueueEntry>,
    seq_by_key: HashMap<ProcessKey, i64>,
}

impl QueueTable {
    fn get_mut(&mut self, key: &ProcessKey) -> Option<&mut QueueEntry> {
        let seq = self.seq_by_key.get(key)?;
        self.entries.get_mut(seq)
    }

    fn transition(&mut self, key: &ProcessKey, expected: ProcessStatus, new: ProcessStatus) -> Option<&mut QueueEntry> {
        let entry = self.get_mut(key)?;
        if entry.status != expected {
            return None;
        }
        entry.status = new;
        entry.version += 1;
        entry.last_updated_at = now_ms();
        Some(entry)
    }
}

#[derive(Default)]
struct WaitTable {
    last_seq: i64,
    records: HashMap<ProcessKey, WaitingProcess>,
}

impl WaitTable {
    fn next_seq(&mut self) -> i64 {
        self.last_seq += 1;
        self.last_seq
    }
}

/// Store backed by process memory, one mutex per table
///
/// Conditional updates check and write under the table lock, which gives the
/// same winner-takes-all behavior as the SQLite backend within one process.
#[derive(Default)]
pub struct MemoryStore {
    queue: Mutex<QueueTable>,
    waits: Mutex<WaitTable>,
    commands: Mutex<Vec<AgentCommand>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, table: &str) -> StoreResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable(format!("{} table lock poisoned", table)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert(&self, entry: NewEntry) -> StoreResult<QueueEntry> {
        debug!("MemoryStore::insert: called");
        let mut queue = lock(&self.queue, "queue")?;
        if let Some(key) = entry.key.filter(|k| queue.seq_by_key.contains_key(k)) {
            return Err(StoreError::InvalidState {
                key: key.to_string(),
                reason: "already enqueued".to_string(),
            });
        }

        queue.last_seq += 1;
        let entry = entry.into_entry(queue.last_seq);
        queue.seq_by_key.insert(entry.key, entry.seq_id);
        queue.entries.insert(entry.seq_id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, key: &ProcessKey) -> StoreResult<Option<QueueEntry>> {
        let queue = lock(&self.queue, "queue")?;
        Ok(queue.seq_by_key.get(key).and_then(|seq| queue.entries.get(seq)).cloned())
    }

    async fn next_enqueued(&self, offset: usize, limit: usize) -> StoreResult<Vec<QueueEntry>> {
        debug!(%offset, %limit, "MemoryStore::next_enqueued: called");
        let now = now_ms();
        let queue = lock(&self.queue, "queue")?;
        Ok(queue
            .entries
            .values()
            .filter(|e| e.is_dispatchable(now))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: ProcessStatus, limit: usize) -> StoreResult<Vec<QueueEntry>> {
        let queue = lock(&self.queue, "queue")?;
        Ok(queue
            .entries
            .values()
            .filter(|e| e.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_expected_status(
        &self,
        key: &ProcessKey,
        expected: ProcessStatus,
        new: ProcessStatus,
    ) -> StoreResult<bool> {
        debug!(%key, %expected, %new, "MemoryStore::update_expected_status: called");
        let mut queue = lock(&self.queue, "queue")?;
        Ok(queue.transition(key, expected, new).is_some())
    }

    async fn claim(&self, key: &ProcessKey, agent_id: &str) -> StoreResult<bool> {
        debug!(%key, %agent_id, "MemoryStore::claim: called");
        let mut queue = lock(&self.queue, "queue")?;
        match queue.transition(key, ProcessStatus::Enqueued, ProcessStatus::Starting) {
            Some(entry) => {
                entry.agent_id = Some(agent_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_statuses(&self, ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Option<ProcessStatus>>> {
        let queue = lock(&self.queue, "queue")?;
        let mut found: HashMap<Uuid, Option<ProcessStatus>> = ids.iter().map(|id| (*id, None)).collect();
        for entry in queue.entries.values() {
            if let Some(slot) = found.get_mut(&entry.key.instance_id) {
                *slot = Some(entry.status);
            }
        }
        Ok(found)
    }

    async fn resume(&self, key: &ProcessKey, events: &BTreeSet<String>) -> StoreResult<bool> {
        debug!(%key, ?events, "MemoryStore::resume: called");
        let mut queue = lock(&self.queue, "queue")?;
        match queue.transition(key, ProcessStatus::Suspended, ProcessStatus::Enqueued) {
            Some(entry) => {
                entry.resume_events = events.clone();
                entry.agent_id = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl WaitStore for MemoryStore {
    async fn suspend(&self, key: &ProcessKey, waits: Vec<WaitCondition>) -> StoreResult<WaitingProcess> {
        debug!(%key, count = waits.len(), "MemoryStore::suspend: called");
        // Lock order: queue, then waits
        let mut queue = lock(&self.queue, "queue")?;
        let entry = queue
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if !matches!(entry.status, ProcessStatus::Enqueued | ProcessStatus::Running) {
            return Err(StoreError::InvalidState {
                key: key.to_string(),
                reason: format!("cannot suspend a {} process", entry.status),
            });
        }
        entry.status = ProcessStatus::Suspended;
        entry.version += 1;
        entry.last_updated_at = now_ms();

        let mut table = lock(&self.waits, "waits")?;
        let seq_id = table.next_seq();
        let record = WaitingProcess {
            key: *key,
            seq_id,
            is_waiting: !waits.is_empty(),
            waits,
            version: 0,
        };
        table.records.insert(*key, record.clone());
        Ok(record)
    }

    async fn get_wait(&self, key: &ProcessKey) -> StoreResult<Option<WaitingProcess>> {
        let table = lock(&self.waits, "waits")?;
        Ok(table.records.get(key).cloned())
    }

    async fn next_wait_items(&self, after_id: Option<i64>, limit: usize) -> StoreResult<Vec<WaitingProcess>> {
        debug!(?after_id, %limit, "MemoryStore::next_wait_items: called");
        let table = lock(&self.waits, "waits")?;
        let after = after_id.unwrap_or(i64::MIN);
        let mut items: Vec<WaitingProcess> = table
            .records
            .values()
            .filter(|r| r.is_waiting && r.seq_id > after)
            .cloned()
            .collect();
        items.sort_by_key(|r| r.seq_id);
        items.truncate(limit);
        Ok(items)
    }

    async fn set_wait(
        &self,
        key: &ProcessKey,
        waits: Vec<WaitCondition>,
        is_waiting: bool,
        expected_version: i64,
    ) -> StoreResult<bool> {
        debug!(%key, %is_waiting, %expected_version, "MemoryStore::set_wait: called");
        let mut table = lock(&self.waits, "waits")?;
        match table.records.get_mut(key) {
            Some(record) if record.version == expected_version => {
                record.waits = waits;
                record.is_waiting = is_waiting;
                record.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn import_wait(&self, record: &WaitingProcess) -> StoreResult<bool> {
        debug!(key = %record.key, "MemoryStore::import_wait: called");
        let mut table = lock(&self.waits, "waits")?;
        if table.records.contains_key(&record.key) {
            return Ok(false);
        }
        let seq_id = table.next_seq();
        table.records.insert(
            record.key,
            WaitingProcess {
                seq_id,
                ..record.clone()
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl CommandStore for MemoryStore {
    async fn insert_command(&self, agent_id: &str, data: Value) -> StoreResult<AgentCommand> {
        debug!(%agent_id, "MemoryStore::insert_command: called");
        let command = AgentCommand {
            command_id: Uuid::now_v7(),
            agent_id: agent_id.to_string(),
            status: CommandStatus::Created,
            created_at: now_ms(),
            data,
        };
        lock(&self.commands, "commands")?.push(command.clone());
        Ok(command)
    }

    async fn next_commands(&self, offset: usize, limit: usize) -> StoreResult<Vec<AgentCommand>> {
        let commands = lock(&self.commands, "commands")?;
        Ok(commands
            .iter()
            .filter(|c| c.status == CommandStatus::Created)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, command_id: &Uuid) -> StoreResult<bool> {
        self.transition_command(command_id, CommandStatus::Created, CommandStatus::Sent)
    }

    async fn unmark_sent(&self, command_id: &Uuid) -> StoreResult<bool> {
        debug!(%command_id, "MemoryStore::unmark_sent: called");
        self.transition_command(command_id, CommandStatus::Sent, CommandStatus::Created)
    }
}

impl MemoryStore {
    fn transition_command(&self, command_id: &Uuid, from: CommandStatus, to: CommandStatus) -> StoreResult<bool> {
        let mut commands = lock(&self.commands, "commands")?;
        match commands
            .iter_mut()
            .find(|c| &c.command_id == command_id && c.status == from)
        {
            Some(command) => {
                command.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
