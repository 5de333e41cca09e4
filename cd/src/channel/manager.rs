//! ChannelManager - registry of open worker channels

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::ChannelConfig;
use super::error::ChannelError;
use super::message::{Message, MessageType};
use super::message_channel::MessageChannel;

/// A request taken off a channel, remembered with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub channel_id: String,
    pub worker_id: String,
    pub message: Message,
}

/// Registry of worker channels keyed by channel id
///
/// Constructed explicitly and shared by `Arc` between the transport handlers
/// and the dispatch loops. The map is sharded and each channel locks its own
/// queues, so there is no global lock on the poll path.
pub struct ChannelManager {
    channels: DashMap<String, Arc<MessageChannel>>,
    closed: AtomicBool,
    config: ChannelConfig,
}

impl ChannelManager {
    pub fn new(config: ChannelConfig) -> Self {
        debug!(?config, "ChannelManager::new: called");
        Self {
            channels: DashMap::new(),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Open and register a channel for a connecting worker
    pub fn connect(&self, worker_id: &str, pool: Option<String>) -> Result<Arc<MessageChannel>, ChannelError> {
        debug!(%worker_id, ?pool, "ChannelManager::connect: called");
        let channel = Arc::new(MessageChannel::new(
            Uuid::now_v7().to_string(),
            worker_id,
            pool,
            &self.config,
        ));
        self.add(channel.clone())?;
        Ok(channel)
    }

    /// Register an existing channel
    pub fn add(&self, channel: Arc<MessageChannel>) -> Result<(), ChannelError> {
        debug!(channel_id = %channel.channel_id(), "ChannelManager::add: called");
        if self.is_closed() {
            return Err(ChannelError::ManagerClosed);
        }

        match self.channels.entry(channel.channel_id().to_string()) {
            Entry::Occupied(_) => return Err(ChannelError::DuplicateChannel(channel.channel_id().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(channel.clone());
            }
        }

        // Lost a race with shutdown: undo so nothing outlives the manager
        if self.is_closed() {
            self.channels.remove(channel.channel_id());
            channel.close();
            return Err(ChannelError::ManagerClosed);
        }

        info!(channel_id = %channel.channel_id(), worker_id = %channel.worker_id(), "Channel opened");
        Ok(())
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<MessageChannel>> {
        self.channels.get(channel_id).map(|c| c.value().clone())
    }

    /// Unregister and close a channel; `false` if it was not registered
    pub fn close(&self, channel_id: &str) -> bool {
        debug!(%channel_id, "ChannelManager::close: called");
        match self.channels.remove(channel_id) {
            Some((_, channel)) => {
                channel.close();
                info!(%channel_id, worker_id = %channel.worker_id(), "Channel closed");
                true
            }
            None => false,
        }
    }

    /// Offer a message to one channel
    ///
    /// Unknown, closed or saturated channels yield `false`; nothing is raised.
    pub fn send_message(&self, channel_id: &str, message: Message) -> bool {
        debug!(%channel_id, message_type = %message.message_type(), "ChannelManager::send_message: called");
        match self.get(channel_id) {
            Some(channel) => channel.offer_message(message),
            None => {
                warn!(error = %ChannelError::NotFound(channel_id.to_string()), "Dropping message");
                false
            }
        }
    }

    /// Take every pending request of `message_type` from every open, non-draining channel
    pub fn get_requests(&self, message_type: MessageType) -> Vec<PendingRequest> {
        let mut requests = Vec::new();
        for channel in self.channels() {
            if !channel.is_open() || channel.is_draining() {
                continue;
            }
            while let Some(message) = channel.get_message(message_type) {
                requests.push(PendingRequest {
                    channel_id: channel.channel_id().to_string(),
                    worker_id: channel.worker_id().to_string(),
                    message,
                });
            }
        }
        debug!(%message_type, count = requests.len(), "ChannelManager::get_requests: collected");
        requests
    }

    /// Hand an unanswered request back to its channel
    ///
    /// Returns `false` when the channel has gone away; the request is dropped
    /// and the worker re-asks after reconnecting.
    pub fn restore_request(&self, request: PendingRequest) -> bool {
        match self.get(&request.channel_id) {
            Some(channel) => channel.restore_message(request.message),
            None => {
                debug!(channel_id = %request.channel_id, "ChannelManager::restore_request: channel gone");
                false
            }
        }
    }

    /// Stop handing new work to a channel's worker
    pub fn drain(&self, channel_id: &str) -> bool {
        match self.get(channel_id) {
            Some(channel) => {
                channel.set_draining(true);
                info!(%channel_id, "Channel draining");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the registered channels
    pub fn channels(&self) -> Vec<Arc<MessageChannel>> {
        self.channels.iter().map(|c| c.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject new registrations and close every channel
    ///
    /// Idempotent; returns how many channels this call closed.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("ChannelManager::shutdown: already closed");
            return 0;
        }

        let ids: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.close(&id) {
                closed += 1;
            } else {
                warn!(channel_id = %id, "Channel vanished during shutdown");
            }
        }
        info!(closed, "ChannelManager shut down");
        closed
    }
}
