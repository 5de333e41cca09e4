//! CommandDispatcher - delivers queued agent commands to their agents

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use crate::channel::{ChannelManager, Message, MessageType, PendingRequest};
use crate::domain::{AgentCommand, CommandStore, StoreResult};

pub struct CommandDispatcher {
    commands: Arc<dyn CommandStore>,
    channels: Arc<ChannelManager>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(commands: Arc<dyn CommandStore>, channels: Arc<ChannelManager>, config: DispatcherConfig) -> Self {
        Self {
            commands,
            channels,
            config,
        }
    }

    /// Answer command requests with CREATED commands for the same agent
    ///
    /// Returns how many commands were delivered.
    pub async fn dispatch_once(&self) -> StoreResult<usize> {
        let mut inbox = self.channels.get_requests(MessageType::CommandRequest);
        if inbox.is_empty() {
            return Ok(0);
        }
        debug!(requests = inbox.len(), "CommandDispatcher::dispatch_once: called");

        let result = self.scan(&mut inbox).await;

        for request in inbox.into_iter().rev() {
            self.channels.restore_request(request);
        }
        result
    }

    async fn scan(&self, inbox: &mut Vec<PendingRequest>) -> StoreResult<usize> {
        let mut delivered = 0;
        let mut offset = 0;

        while !inbox.is_empty() {
            let page = self.commands.next_commands(offset, self.config.batch_size).await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();
            let mut sent = 0;

            for command in page {
                let Some(index) = inbox.iter().position(|r| requested_by(r, &command.agent_id)) else {
                    continue;
                };
                sent += 1;
                if !self.commands.mark_sent(&command.command_id).await? {
                    debug!(command_id = %command.command_id, "CommandDispatcher::scan: already sent");
                    continue;
                }
                let request = inbox.remove(index);
                if self.deliver(command, request).await? {
                    delivered += 1;
                }
                if inbox.is_empty() {
                    break;
                }
            }

            if fetched < self.config.batch_size {
                break;
            }
            offset += fetched - sent;
        }

        if delivered > 0 {
            info!(delivered, "Commands delivered");
        }
        Ok(delivered)
    }

    /// Send a command already marked SENT; returns whether it reached the channel
    async fn deliver(&self, command: AgentCommand, request: PendingRequest) -> StoreResult<bool> {
        let response = Message::CommandResponse {
            correlation_id: request.message.correlation_id(),
            payload: json!({
                "commandId": command.command_id,
                "data": command.data,
            }),
        };
        if self.channels.send_message(&request.channel_id, response) {
            debug!(command_id = %command.command_id, agent_id = %command.agent_id, "CommandDispatcher::deliver: sent");
            return Ok(true);
        }

        // Hand the command back to the queue so the agent's next request picks it up
        warn!(command_id = %command.command_id, agent_id = %command.agent_id, "Command delivery failed, re-queueing");
        if !self.commands.unmark_sent(&command.command_id).await? {
            warn!(command_id = %command.command_id, "Command changed before it could be re-queued");
        }
        Ok(false)
    }

    /// Run command ticks until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(interval_ms = self.config.poll_interval_ms, "CommandDispatcher started");
        let mut interval = tokio::time::interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        error!(error = %e, "Command dispatch failed");
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.error_delay()) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("CommandDispatcher stopped");
    }
}

/// Commands go to the worker that owns the channel, whatever id the request names
fn requested_by(request: &PendingRequest, agent_id: &str) -> bool {
    matches!(request.message, Message::CommandRequest { .. }) && request.worker_id == agent_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::domain::MemoryStore;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryStore>, Arc<ChannelManager>, CommandDispatcher) {
        let store = Arc::new(MemoryStore::new());
        let channels = Arc::new(ChannelManager::new(ChannelConfig::default()));
        let dispatcher = CommandDispatcher::new(store.clone(), channels.clone(), DispatcherConfig::default());
        (store, channels, dispatcher)
    }

    #[tokio::test]
    async fn test_delivers_to_matching_agent() {
        let (store, channels, dispatcher) = setup();
        let command = store.insert_command("agent-1", json!({"type": "CANCEL_JOB"})).await.unwrap();
        let ch = channels.connect("agent-1", None).unwrap();
        let request = Message::command_request("agent-1");
        ch.submit(request.clone());

        assert_eq!(dispatcher.dispatch_once().await.unwrap(), 1);
        match ch.poll(MessageType::CommandResponse, Duration::from_millis(10)).await {
            Some(Message::CommandResponse {
                correlation_id,
                payload,
            }) => {
                assert_eq!(correlation_id, request.correlation_id());
                assert_eq!(payload["commandId"], command.command_id.to_string());
                assert_eq!(payload["data"]["type"], "CANCEL_JOB");
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        assert!(store.next_commands(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_agents_request_is_restored() {
        let (store, channels, dispatcher) = setup();
        store.insert_command("agent-1", json!({})).await.unwrap();
        let ch = channels.connect("agent-2", None).unwrap();
        ch.submit(Message::command_request("agent-2"));

        assert_eq!(dispatcher.dispatch_once().await.unwrap(), 0);
        assert_eq!(ch.pending_inbound(), 1);
        assert_eq!(store.next_commands(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_request_naming_another_agent_gets_nothing() {
        let (store, channels, dispatcher) = setup();
        store.insert_command("agent-1", json!({"type": "CANCEL_JOB"})).await.unwrap();
        let ch = channels.connect("agent-2", None).unwrap();
        ch.submit(Message::command_request("agent-1"));

        assert_eq!(dispatcher.dispatch_once().await.unwrap(), 0);
        assert!(ch.poll(MessageType::CommandResponse, Duration::from_millis(10)).await.is_none());
        assert_eq!(store.next_commands(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_requeues_command() {
        let store = Arc::new(MemoryStore::new());
        let channels = Arc::new(ChannelManager::new(ChannelConfig {
            outbound_capacity: 1,
            ..Default::default()
        }));
        let dispatcher = CommandDispatcher::new(store.clone(), channels.clone(), DispatcherConfig::default());

        let command = store.insert_command("agent-1", json!({"type": "CANCEL_JOB"})).await.unwrap();
        let ch = channels.connect("agent-1", None).unwrap();
        // Fill the outbound queue so the response cannot be offered
        assert!(ch.offer_message(Message::CommandResponse {
            correlation_id: uuid::Uuid::now_v7(),
            payload: json!({}),
        }));
        ch.submit(Message::command_request("agent-1"));

        assert_eq!(dispatcher.dispatch_once().await.unwrap(), 0);
        let pending = store.next_commands(0, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].command_id, command.command_id);

        // Once the worker drains its queue the command goes out
        assert!(ch.poll(MessageType::CommandResponse, Duration::from_millis(10)).await.is_some());
        ch.submit(Message::command_request("agent-1"));
        assert_eq!(dispatcher.dispatch_once().await.unwrap(), 1);
        assert!(store.next_commands(0, 10).await.unwrap().is_empty());
    }
}
