//! SQLite store backend
//!
//! Timestamps are stored as Unix milliseconds, JSON columns as text. Every
//! conditional update is one `UPDATE ... WHERE` statement whose affected-row
//! count decides the winner, so several processes may share a database file.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::command::{AgentCommand, CommandStatus};
use super::entry::{NewEntry, QueueEntry};
use super::error::{StoreError, StoreResult};
use super::key::{ProcessKey, now_ms};
use super::status::ProcessStatus;
use super::store::{CommandStore, QueueStore, WaitStore};
use super::wait::{WaitCondition, WaitingProcess};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS process_queue (
  seq_id INTEGER PRIMARY KEY AUTOINCREMENT,
  instance_id TEXT NOT NULL UNIQUE,
  created_at INTEGER NOT NULL,
  current_status TEXT NOT NULL,
  requirements TEXT NOT NULL,
  payload TEXT NOT NULL,
  start_at INTEGER,
  resume_events TEXT NOT NULL,
  agent_id TEXT,
  version INTEGER NOT NULL,
  last_updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_status ON process_queue(current_status, seq_id);

CREATE TABLE IF NOT EXISTS process_wait_conditions (
  id_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  instance_id TEXT NOT NULL UNIQUE,
  instance_created_at INTEGER NOT NULL,
  is_waiting INTEGER NOT NULL,
  wait_conditions TEXT NOT NULL,
  version INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_waits_waiting ON process_wait_conditions(is_waiting, id_seq);

CREATE TABLE IF NOT EXISTS agent_commands (
  seq_id INTEGER PRIMARY KEY AUTOINCREMENT,
  command_id TEXT NOT NULL UNIQUE,
  agent_id TEXT NOT NULL,
  command_status TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  command_data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_commands_status ON agent_commands(command_status, seq_id);
"#;

const ENTRY_COLUMNS: &str = "seq_id, instance_id, created_at, current_status, requirements, payload, start_at, \
                             resume_events, agent_id, version, last_updated_at";

const WAIT_COLUMNS: &str = "id_seq, instance_id, instance_created_at, is_waiting, wait_conditions, version";

const COMMAND_COLUMNS: &str = "command_id, agent_id, command_status, created_at, command_data";

/// Store backed by a SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(conn)?;
        info!(?path, "Opened queue store");
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

fn ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(value: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", value)))
}

fn parse_key(instance_id: &str, created_at: i64) -> StoreResult<ProcessKey> {
    ProcessKey::from_columns(instance_id, created_at)
        .ok_or_else(|| StoreError::Corrupt(format!("bad process key: {}", instance_id)))
}

fn parse_status(value: &str) -> StoreResult<ProcessStatus> {
    value.parse().map_err(StoreError::Corrupt)
}

/// Column values of a `process_queue` row, decoded after the statement finishes
struct EntryRow {
    seq_id: i64,
    instance_id: String,
    created_at: i64,
    status: String,
    requirements: String,
    payload: String,
    start_at: Option<i64>,
    resume_events: String,
    agent_id: Option<String>,
    version: i64,
    last_updated_at: i64,
}

impl EntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq_id: row.get(0)?,
            instance_id: row.get(1)?,
            created_at: row.get(2)?,
            status: row.get(3)?,
            requirements: row.get(4)?,
            payload: row.get(5)?,
            start_at: row.get(6)?,
            resume_events: row.get(7)?,
            agent_id: row.get(8)?,
            version: row.get(9)?,
            last_updated_at: row.get(10)?,
        })
    }

    fn decode(self) -> StoreResult<QueueEntry> {
        Ok(QueueEntry {
            key: parse_key(&self.instance_id, self.created_at)?,
            seq_id: self.seq_id,
            status: parse_status(&self.status)?,
            requirements: serde_json::from_str(&self.requirements)?,
            payload: serde_json::from_str(&self.payload)?,
            start_at: self.start_at.map(from_ms).transpose()?,
            resume_events: serde_json::from_str(&self.resume_events)?,
            agent_id: self.agent_id,
            version: self.version,
            last_updated_at: from_ms(self.last_updated_at)?,
        })
    }
}

struct WaitRow {
    seq_id: i64,
    instance_id: String,
    created_at: i64,
    is_waiting: bool,
    waits: String,
    version: i64,
}

impl WaitRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq_id: row.get(0)?,
            instance_id: row.get(1)?,
            created_at: row.get(2)?,
            is_waiting: row.get(3)?,
            waits: row.get(4)?,
            version: row.get(5)?,
        })
    }

    fn decode(self) -> StoreResult<WaitingProcess> {
        Ok(WaitingProcess {
            key: parse_key(&self.instance_id, self.created_at)?,
            seq_id: self.seq_id,
            is_waiting: self.is_waiting,
            waits: serde_json::from_str(&self.waits)?,
            version: self.version,
        })
    }
}

struct CommandRow {
    command_id: String,
    agent_id: String,
    status: String,
    created_at: i64,
    data: String,
}

impl CommandRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            command_id: row.get(0)?,
            agent_id: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            data: row.get(4)?,
        })
    }

    fn decode(self) -> StoreResult<AgentCommand> {
        Ok(AgentCommand {
            command_id: Uuid::parse_str(&self.command_id)
                .map_err(|e| StoreError::Corrupt(format!("bad command id {}: {}", self.command_id, e)))?,
            agent_id: self.agent_id,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            created_at: from_ms(self.created_at)?,
            data: serde_json::from_str(&self.data)?,
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn insert(&self, entry: NewEntry) -> StoreResult<QueueEntry> {
        debug!("SqliteStore::insert: called");
        let mut entry = entry.into_entry(0);
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO process_queue (instance_id, created_at, current_status, requirements, payload, start_at, \
             resume_events, agent_id, version, last_updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9)",
            params![
                entry.key.instance_id.to_string(),
                ms(entry.key.created_at),
                entry.status.as_str(),
                serde_json::to_string(&entry.requirements)?,
                serde_json::to_string(&entry.payload)?,
                entry.start_at.map(ms),
                serde_json::to_string(&entry.resume_events)?,
                entry.version,
                ms(entry.last_updated_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::InvalidState {
                    key: entry.key.to_string(),
                    reason: "already enqueued".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        entry.seq_id = conn.last_insert_rowid();
        Ok(entry)
    }

    async fn get(&self, key: &ProcessKey) -> StoreResult<Option<QueueEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM process_queue WHERE instance_id = ?1 AND created_at = ?2",
                    ENTRY_COLUMNS
                ),
                params![key.instance_id.to_string(), ms(key.created_at)],
                EntryRow::read,
            )
            .optional()?;
        row.map(EntryRow::decode).transpose()
    }

    async fn next_enqueued(&self, offset: usize, limit: usize) -> StoreResult<Vec<QueueEntry>> {
        debug!(%offset, %limit, "SqliteStore::next_enqueued: called");
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM process_queue WHERE current_status = ?1 AND (start_at IS NULL OR start_at <= ?2) \
             ORDER BY seq_id LIMIT ?3 OFFSET ?4",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![ProcessStatus::Enqueued.as_str(), ms(now_ms()), limit as i64, offset as i64],
                EntryRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(EntryRow::decode).collect()
    }

    async fn list_by_status(&self, status: ProcessStatus, limit: usize) -> StoreResult<Vec<QueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM process_queue WHERE current_status = ?1 ORDER BY seq_id LIMIT ?2",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status.as_str(), limit as i64], EntryRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(EntryRow::decode).collect()
    }

    async fn update_expected_status(
        &self,
        key: &ProcessKey,
        expected: ProcessStatus,
        new: ProcessStatus,
    ) -> StoreResult<bool> {
        debug!(%key, %expected, %new, "SqliteStore::update_expected_status: called");
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE process_queue SET current_status = ?1, version = version + 1, last_updated_at = ?2 \
             WHERE instance_id = ?3 AND created_at = ?4 AND current_status = ?5",
            params![
                new.as_str(),
                ms(now_ms()),
                key.instance_id.to_string(),
                ms(key.created_at),
                expected.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    async fn claim(&self, key: &ProcessKey, agent_id: &str) -> StoreResult<bool> {
        debug!(%key, %agent_id, "SqliteStore::claim: called");
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE process_queue SET current_status = ?1, agent_id = ?2, version = version + 1, last_updated_at = ?3 \
             WHERE instance_id = ?4 AND created_at = ?5 AND current_status = ?6",
            params![
                ProcessStatus::Starting.as_str(),
                agent_id,
                ms(now_ms()),
                key.instance_id.to_string(),
                ms(key.created_at),
                ProcessStatus::Enqueued.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    async fn find_statuses(&self, ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Option<ProcessStatus>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT current_status FROM process_queue WHERE instance_id = ?1")?;
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            let status: Option<String> = stmt
                .query_row(params![id.to_string()], |row| row.get(0))
                .optional()?;
            found.insert(*id, status.as_deref().map(parse_status).transpose()?);
        }
        Ok(found)
    }

    async fn resume(&self, key: &ProcessKey, events: &BTreeSet<String>) -> StoreResult<bool> {
        debug!(%key, ?events, "SqliteStore::resume: called");
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE process_queue SET current_status = ?1, resume_events = ?2, agent_id = NULL, \
             version = version + 1, last_updated_at = ?3 \
             WHERE instance_id = ?4 AND created_at = ?5 AND current_status = ?6",
            params![
                ProcessStatus::Enqueued.as_str(),
                serde_json::to_string(events)?,
                ms(now_ms()),
                key.instance_id.to_string(),
                ms(key.created_at),
                ProcessStatus::Suspended.as_str()
            ],
        )?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl WaitStore for SqliteStore {
    async fn suspend(&self, key: &ProcessKey, waits: Vec<WaitCondition>) -> StoreResult<WaitingProcess> {
        debug!(%key, count = waits.len(), "SqliteStore::suspend: called");
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE process_queue SET current_status = ?1, version = version + 1, last_updated_at = ?2 \
             WHERE instance_id = ?3 AND created_at = ?4 AND current_status IN (?5, ?6)",
            params![
                ProcessStatus::Suspended.as_str(),
                ms(now_ms()),
                key.instance_id.to_string(),
                ms(key.created_at),
                ProcessStatus::Enqueued.as_str(),
                ProcessStatus::Running.as_str()
            ],
        )?;
        if changed == 0 {
            let status: Option<String> = tx
                .query_row(
                    "SELECT current_status FROM process_queue WHERE instance_id = ?1 AND created_at = ?2",
                    params![key.instance_id.to_string(), ms(key.created_at)],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match status {
                None => StoreError::NotFound(key.to_string()),
                Some(status) => StoreError::InvalidState {
                    key: key.to_string(),
                    reason: format!("cannot suspend a {} process", status),
                },
            });
        }

        // A fresh row (and id) per suspension keeps the watchdog cursor moving forward
        tx.execute(
            "DELETE FROM process_wait_conditions WHERE instance_id = ?1",
            params![key.instance_id.to_string()],
        )?;
        let is_waiting = !waits.is_empty();
        tx.execute(
            "INSERT INTO process_wait_conditions (instance_id, instance_created_at, is_waiting, wait_conditions, version) \
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                key.instance_id.to_string(),
                ms(key.created_at),
                is_waiting,
                serde_json::to_string(&waits)?
            ],
        )?;
        let seq_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(WaitingProcess {
            key: *key,
            seq_id,
            is_waiting,
            waits,
            version: 0,
        })
    }

    async fn get_wait(&self, key: &ProcessKey) -> StoreResult<Option<WaitingProcess>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM process_wait_conditions WHERE instance_id = ?1 AND instance_created_at = ?2",
                    WAIT_COLUMNS
                ),
                params![key.instance_id.to_string(), ms(key.created_at)],
                WaitRow::read,
            )
            .optional()?;
        row.map(WaitRow::decode).transpose()
    }

    async fn next_wait_items(&self, after_id: Option<i64>, limit: usize) -> StoreResult<Vec<WaitingProcess>> {
        debug!(?after_id, %limit, "SqliteStore::next_wait_items: called");
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM process_wait_conditions WHERE is_waiting = 1 AND id_seq > ?1 ORDER BY id_seq LIMIT ?2",
            WAIT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![after_id.unwrap_or(i64::MIN), limit as i64], WaitRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(WaitRow::decode).collect()
    }

    async fn set_wait(
        &self,
        key: &ProcessKey,
        waits: Vec<WaitCondition>,
        is_waiting: bool,
        expected_version: i64,
    ) -> StoreResult<bool> {
        debug!(%key, %is_waiting, %expected_version, "SqliteStore::set_wait: called");
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE process_wait_conditions SET wait_conditions = ?1, is_waiting = ?2, version = version + 1 \
             WHERE instance_id = ?3 AND instance_created_at = ?4 AND version = ?5",
            params![
                serde_json::to_string(&waits)?,
                is_waiting,
                key.instance_id.to_string(),
                ms(key.created_at),
                expected_version
            ],
        )?;
        Ok(changed == 1)
    }

    async fn import_wait(&self, record: &WaitingProcess) -> StoreResult<bool> {
        debug!(key = %record.key, "SqliteStore::import_wait: called");
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO process_wait_conditions \
             (instance_id, instance_created_at, is_waiting, wait_conditions, version) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.key.instance_id.to_string(),
                ms(record.key.created_at),
                record.is_waiting,
                serde_json::to_string(&record.waits)?,
                record.version
            ],
        )?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl CommandStore for SqliteStore {
    async fn insert_command(&self, agent_id: &str, data: Value) -> StoreResult<AgentCommand> {
        debug!(%agent_id, "SqliteStore::insert_command: called");
        let command = AgentCommand {
            command_id: Uuid::now_v7(),
            agent_id: agent_id.to_string(),
            status: CommandStatus::Created,
            created_at: now_ms(),
            data,
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agent_commands (command_id, agent_id, command_status, created_at, command_data) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                command.command_id.to_string(),
                command.agent_id,
                command.status.as_str(),
                ms(command.created_at),
                serde_json::to_string(&command.data)?
            ],
        )?;
        Ok(command)
    }

    async fn next_commands(&self, offset: usize, limit: usize) -> StoreResult<Vec<AgentCommand>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM agent_commands WHERE command_status = ?1 ORDER BY seq_id LIMIT ?2 OFFSET ?3",
            COMMAND_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![CommandStatus::Created.as_str(), limit as i64, offset as i64],
                CommandRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(CommandRow::decode).collect()
    }

    async fn mark_sent(&self, command_id: &Uuid) -> StoreResult<bool> {
        self.transition_command(command_id, CommandStatus::Created, CommandStatus::Sent)
    }

    async fn unmark_sent(&self, command_id: &Uuid) -> StoreResult<bool> {
        debug!(%command_id, "SqliteStore::unmark_sent: called");
        self.transition_command(command_id, CommandStatus::Sent, CommandStatus::Created)
    }
}

impl SqliteStore {
    fn transition_command(&self, command_id: &Uuid, from: CommandStatus, to: CommandStatus) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE agent_commands SET command_status = ?1 WHERE command_id = ?2 AND command_status = ?3",
            params![to.as_str(), command_id.to_string(), from.as_str()],
        )?;
        Ok(changed == 1)
    }
}
