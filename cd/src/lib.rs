//! Conductor - pull-based process dispatch for remote worker fleets
//!
//! Workers never accept connections. They open a message channel, submit
//! capability requests and long-poll for answers; the coordinator matches
//! those requests against its queue on a periodic tick.
//!
//! # Core Concepts
//!
//! - **Conditional claims**: an entry moves ENQUEUED -> STARTING through an
//!   expected-status update in the store, so replicas sharing a database hand
//!   each process to at most one worker
//! - **Failure isolation**: a malformed requirement or a failing wait handler
//!   affects only its own record
//! - **Advisory scaling**: the autoscaler publishes target sizes, it never
//!   creates or removes workers itself
//!
//! # Modules
//!
//! - [`channel`] - per-worker message channels and their registry
//! - [`dispatcher`] - requirement matching and the dispatch loops
//! - [`autoscaler`] - pool target computation
//! - [`watchdog`] - wait-condition handlers and the resume poller
//! - [`coordinator`] - starts and stops the loops
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod autoscaler;
pub mod channel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod domain;
pub mod watchdog;

// Re-export commonly used types
pub use autoscaler::{
    AutoscaleError, Autoscaler, AutoscalerConfig, PoolRegistry, PoolState, ScaleDecision, ScaleDirection,
    ScalingConfig, compute_target,
};
pub use channel::{ChannelConfig, ChannelError, ChannelManager, Message, MessageChannel, MessageType};
pub use config::{Config, StorageBackend, StorageConfig};
pub use coordinator::{Coordinator, CoordinatorHandle, Stores};
pub use dispatcher::{
    CommandDispatcher, CompiledRequirements, DispatcherConfig, ErrorSink, LoggingErrorSink, ProcessDispatcher,
    RequirementError, find_match,
};
pub use domain::Capabilities;
pub use watchdog::{
    HandlerOutcome, HandlerTable, ProcessResumer, QueueResumer, ResumeRequest, SignalBoard, WaitHandler, Watchdog,
    WatchdogConfig, WatchdogStats,
};
