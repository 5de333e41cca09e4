//! Dispatcher - matches worker requests to queued work
//!
//! Runs on a periodic tick: pull outstanding requests from the channel
//! manager, scan the queue oldest first, claim through the store's
//! conditional update and answer on the requesting worker's channel.

mod command;
mod config;
mod matcher;
mod process;
mod sink;

pub use command::CommandDispatcher;
pub use config::DispatcherConfig;
pub use matcher::{AGENT_NAMESPACE, CompiledRequirements, RequirementError, find_match, request_capabilities};
pub use process::{DispatchStats, ProcessDispatcher};
pub use sink::{ErrorSink, LoggingErrorSink};
