//! QueueStore - process queue and wait-condition storage
//!
//! Persists queue entries, waiting-process records and agent commands for the
//! coordinator. Every state transition that more than one coordinator replica
//! can race on is a conditional update: the caller names the status (or
//! version) it expects and learns from the returned `bool` whether it won.
//!
//! # Backends
//!
//! - [`MemoryStore`] - per-table mutexes, for tests and single-node runs
//! - [`SqliteStore`] - `rusqlite`, safe to share between processes through
//!   one database file
//!
//! # Example
//!
//! ```ignore
//! use queuestore::{NewEntry, QueueStore, SqliteStore};
//!
//! let store = SqliteStore::open("queue.db")?;
//! let entry = store.insert(NewEntry::new().with_requirements(json!({"agent": {"flavor": "default"}}))).await?;
//! if store.claim(&entry.key, "agent-1").await? {
//!     // this replica owns the process now
//! }
//! ```

mod command;
mod entry;
mod error;
mod key;
mod memory;
mod sqlite;
mod status;
mod store;
mod union;
mod wait;

pub use command::{AgentCommand, CommandStatus};
pub use entry::{NewEntry, QueueEntry};
pub use error::{StoreError, StoreResult};
pub use key::{ProcessKey, now_ms};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use status::ProcessStatus;
pub use store::{CommandStore, QueueStore, WaitStore};
pub use union::UnionWaitReader;
pub use wait::{CompleteCondition, EventMode, WaitCondition, WaitKind, WaitingProcess};
