//! Domain types for Conductor
//!
//! Queue, wait and command records live in queuestore and are re-exported
//! here. Capabilities are the worker-side half of matching.

use std::collections::BTreeMap;

/// Flat capability map a worker reports with every poll, e.g. `flavor -> "default"`
///
/// Keys are the dotted paths used by requirement maps, without the `agent.`
/// prefix (`flavor`, `gpu.model`).
pub type Capabilities = BTreeMap<String, String>;

// Re-export queuestore types for convenience
pub use queuestore::{
    AgentCommand, CommandStatus, CommandStore, CompleteCondition, EventMode, MemoryStore, NewEntry, ProcessKey,
    ProcessStatus, QueueEntry, QueueStore, SqliteStore, StoreError, StoreResult, UnionWaitReader, WaitCondition,
    WaitKind, WaitStore, WaitingProcess, now_ms,
};
