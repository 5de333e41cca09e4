//! A single worker's message channel
//!
//! Workers cannot be pushed to. The coordinator places responses in the
//! outbound queue and the worker picks them up with a bounded long poll;
//! requests travel the other way through the inbound queue. Each queue has
//! its own lock so a worker poll never contends with a dispatcher scan.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::ChannelConfig;
use super::error::ChannelError;
use super::message::{Message, MessageType};

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

pub struct MessageChannel {
    channel_id: String,
    worker_id: String,
    pool: Option<String>,
    opened_at: DateTime<Utc>,

    /// Worker -> coordinator
    inbound: Mutex<VecDeque<Message>>,
    /// Coordinator -> worker
    outbound: Mutex<VecDeque<Message>>,

    inbound_capacity: usize,
    outbound_capacity: usize,
    max_poll_timeout: Duration,

    open: AtomicBool,
    draining: AtomicBool,
    outbound_ready: Notify,
}

impl MessageChannel {
    pub fn new(
        channel_id: impl Into<String>,
        worker_id: impl Into<String>,
        pool: Option<String>,
        config: &ChannelConfig,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            worker_id: worker_id.into(),
            pool,
            opened_at: Utc::now(),
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
            inbound_capacity: config.inbound_capacity,
            outbound_capacity: config.outbound_capacity,
            max_poll_timeout: config.max_poll_timeout(),
            open: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            outbound_ready: Notify::new(),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Pool the worker joined, if any
    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn state(&self) -> ChannelState {
        if self.open.load(Ordering::Acquire) {
            ChannelState::Open
        } else {
            ChannelState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Whether the worker is being drained and should get no new work
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn set_draining(&self, draining: bool) {
        debug!(channel_id = %self.channel_id, %draining, "MessageChannel::set_draining: called");
        self.draining.store(draining, Ordering::Release);
    }

    /// Close the channel; returns `false` if it was already closed
    ///
    /// Pending long polls wake up and return empty.
    pub fn close(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        if was_open {
            debug!(channel_id = %self.channel_id, "MessageChannel::close: closed");
            self.outbound_ready.notify_waiters();
        }
        was_open
    }

    pub fn pending_inbound(&self) -> usize {
        lock(&self.inbound, &self.channel_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn pending_outbound(&self) -> usize {
        lock(&self.outbound, &self.channel_id).map(|q| q.len()).unwrap_or(0)
    }

    // Worker side

    /// Queue a request from the worker; `false` when closed or saturated
    pub fn submit(&self, message: Message) -> bool {
        match self.push_inbound(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "MessageChannel::submit: rejected");
                false
            }
        }
    }

    /// Wait up to `timeout` (capped by the channel's limit) for a message of `message_type`
    pub async fn poll(&self, message_type: MessageType, timeout: Duration) -> Option<Message> {
        debug!(channel_id = %self.channel_id, %message_type, ?timeout, "MessageChannel::poll: called");
        let deadline = Instant::now() + timeout.min(self.max_poll_timeout);

        loop {
            // Register interest before checking so an offer between check and wait is not missed
            let notified = self.outbound_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = take_first(&self.outbound, &self.channel_id, message_type) {
                return Some(message);
            }
            if !self.is_open() {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return take_first(&self.outbound, &self.channel_id, message_type);
            }
        }
    }

    // Coordinator side

    /// Non-blocking enqueue of a message for the worker
    ///
    /// `false` means the message was not accepted (closed or saturated); the
    /// caller keeps ownership of the retry.
    pub fn offer_message(&self, message: Message) -> bool {
        match self.push_outbound(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "MessageChannel::offer_message: rejected");
                false
            }
        }
    }

    /// Pop the oldest pending inbound message of `message_type`
    pub fn get_message(&self, message_type: MessageType) -> Option<Message> {
        take_first(&self.inbound, &self.channel_id, message_type)
    }

    /// Put a message taken with `get_message` back at the head of the inbound queue
    ///
    /// Capacity is not checked: the message already held a slot.
    pub fn restore_message(&self, message: Message) -> bool {
        if !self.is_open() {
            return false;
        }
        match lock(&self.inbound, &self.channel_id) {
            Some(mut queue) => {
                queue.push_front(message);
                true
            }
            None => false,
        }
    }

    fn push_inbound(&self, message: Message) -> Result<(), ChannelError> {
        self.push(&self.inbound, self.inbound_capacity, message)
    }

    fn push_outbound(&self, message: Message) -> Result<(), ChannelError> {
        self.push(&self.outbound, self.outbound_capacity, message)?;
        self.outbound_ready.notify_waiters();
        Ok(())
    }

    fn push(&self, queue: &Mutex<VecDeque<Message>>, capacity: usize, message: Message) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed(self.channel_id.clone()));
        }
        let mut queue = lock(queue, &self.channel_id).ok_or_else(|| ChannelError::Closed(self.channel_id.clone()))?;
        if queue.len() >= capacity {
            return Err(ChannelError::Saturated(self.channel_id.clone()));
        }
        queue.push_back(message);
        Ok(())
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("channel_id", &self.channel_id)
            .field("worker_id", &self.worker_id)
            .field("pool", &self.pool)
            .field("state", &self.state())
            .field("draining", &self.is_draining())
            .finish()
    }
}

/// Lock a queue; a poisoned lock is logged and treated as unavailable
fn lock<'a>(queue: &'a Mutex<VecDeque<Message>>, channel_id: &str) -> Option<MutexGuard<'a, VecDeque<Message>>> {
    match queue.lock() {
        Ok(guard) => Some(guard),
        Err(_) => {
            warn!(%channel_id, "Channel queue lock poisoned");
            None
        }
    }
}

fn take_first(queue: &Mutex<VecDeque<Message>>, channel_id: &str, message_type: MessageType) -> Option<Message> {
    let mut queue = lock(queue, channel_id)?;
    let index = queue.iter().position(|m| m.message_type() == message_type)?;
    queue.remove(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Capabilities;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn channel(config: &ChannelConfig) -> MessageChannel {
        MessageChannel::new("ch-1", "worker-1", None, config)
    }

    fn response() -> Message {
        Message::CommandResponse {
            correlation_id: Uuid::now_v7(),
            payload: json!({"type": "CANCEL_JOB"}),
        }
    }

    #[test]
    fn test_offer_rejects_when_saturated() {
        let config = ChannelConfig {
            outbound_capacity: 1,
            ..Default::default()
        };
        let ch = channel(&config);
        assert!(ch.offer_message(response()));
        assert!(!ch.offer_message(response()));
        assert_eq!(ch.pending_outbound(), 1);
    }

    #[test]
    fn test_offer_rejects_when_closed() {
        let ch = channel(&ChannelConfig::default());
        assert!(ch.close());
        assert!(!ch.close());
        assert!(!ch.offer_message(response()));
        assert!(!ch.submit(Message::command_request("worker-1")));
    }

    #[test]
    fn test_get_message_filters_by_type() {
        let ch = channel(&ChannelConfig::default());
        ch.submit(Message::command_request("worker-1"));
        ch.submit(Message::process_request(Capabilities::new()));

        let msg = ch.get_message(MessageType::ProcessRequest).unwrap();
        assert_eq!(msg.message_type(), MessageType::ProcessRequest);
        assert!(ch.get_message(MessageType::ProcessRequest).is_none());
        assert_eq!(ch.pending_inbound(), 1);
    }

    #[test]
    fn test_restore_puts_message_first() {
        let ch = channel(&ChannelConfig::default());
        let first = Message::process_request(Capabilities::new());
        let second = Message::process_request(Capabilities::new());
        ch.submit(first.clone());
        ch.submit(second);

        let taken = ch.get_message(MessageType::ProcessRequest).unwrap();
        assert!(ch.restore_message(taken));
        assert_eq!(ch.get_message(MessageType::ProcessRequest), Some(first));
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let ch = channel(&ChannelConfig::default());
        let got = ch.poll(MessageType::CommandResponse, Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_offer() {
        let ch = Arc::new(channel(&ChannelConfig::default()));
        let poller = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.poll(MessageType::CommandResponse, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let msg = response();
        assert!(ch.offer_message(msg.clone()));

        let got = tokio::time::timeout(Duration::from_secs(1), poller).await.unwrap().unwrap();
        assert_eq!(got, Some(msg));
    }

    #[tokio::test]
    async fn test_poll_returns_on_close() {
        let ch = Arc::new(channel(&ChannelConfig::default()));
        let poller = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.poll(MessageType::ProcessResponse, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ch.close();

        let got = tokio::time::timeout(Duration::from_secs(1), poller).await.unwrap().unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_poll_timeout_is_capped() {
        let config = ChannelConfig {
            max_poll_timeout_ms: 20,
            ..Default::default()
        };
        let ch = channel(&config);
        let started = std::time::Instant::now();
        ch.poll(MessageType::ProcessResponse, Duration::from_secs(60)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
