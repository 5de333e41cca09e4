//! Channel errors

use thiserror::Error;

/// Errors from channel registration and message transfer
///
/// Offer and submit failures are soft: the public entry points log them and
/// return `false` so callers retry on the next tick.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel manager is closed")]
    ManagerClosed,

    #[error("Channel already registered: {0}")]
    DuplicateChannel(String),

    #[error("Channel not found: {0}")]
    NotFound(String),

    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Channel saturated: {0}")]
    Saturated(String),

    #[error("Wire format error: {0}")]
    Wire(String),
}
