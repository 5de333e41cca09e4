//! Suspended-process watchdog
//!
//! Polls waiting records page by page, evaluates each wait condition through
//! the handler registered for its kind and resumes processes whose conditions
//! resolved.

mod config;
mod handler;
mod handlers;
mod resumer;
mod signals;
mod wait_watchdog;

pub use config::WatchdogConfig;
pub use handler::{HandlerError, HandlerOutcome, HandlerTable, WaitHandler};
pub use handlers::{EventSetHandler, ExternalSignalHandler, ProcessCompletionHandler, SleepHandler, builtin_handlers};
pub use resumer::{ProcessResumer, QueueResumer, ResumeRequest};
pub use signals::SignalBoard;
pub use wait_watchdog::{Watchdog, WatchdogStats};
