//! Pull-based message channels between workers and the coordinator
//!
//! Workers initiate every exchange: they submit requests and long-poll for
//! responses. The coordinator only ever places messages for later pickup.

mod config;
mod error;
mod manager;
mod message;
mod message_channel;

pub use config::ChannelConfig;
pub use error::ChannelError;
pub use manager::{ChannelManager, PendingRequest};
pub use message::{Envelope, Message, MessageType};
pub use message_channel::{ChannelState, MessageChannel};
