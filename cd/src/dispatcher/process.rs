//! ProcessDispatcher - hands queued processes to polling workers

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use super::matcher::find_match;
use super::sink::ErrorSink;
use crate::channel::{ChannelManager, Message, MessageType, PendingRequest};
use crate::domain::{ProcessStatus, QueueEntry, QueueStore, StoreResult};

/// Counters for one dispatch tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests taken from the channels
    pub requests: usize,
    /// Queue entries examined
    pub scanned: usize,
    /// Entries claimed and delivered
    pub dispatched: usize,
    /// Claims lost to another dispatcher
    pub races_lost: usize,
    /// Requests handed back to their channels unanswered
    pub restored: usize,
}

pub struct ProcessDispatcher {
    queue: Arc<dyn QueueStore>,
    channels: Arc<ChannelManager>,
    sink: Arc<dyn ErrorSink>,
    config: DispatcherConfig,
}

impl ProcessDispatcher {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        channels: Arc<ChannelManager>,
        sink: Arc<dyn ErrorSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            channels,
            sink,
            config,
        }
    }

    /// Match pending process requests against the queue, oldest entry first
    ///
    /// Requests that find no entry go back to their channels, also when the
    /// store fails part way through.
    pub async fn dispatch_once(&self) -> StoreResult<DispatchStats> {
        let mut inbox = self.channels.get_requests(MessageType::ProcessRequest);
        let mut stats = DispatchStats {
            requests: inbox.len(),
            ..Default::default()
        };
        if inbox.is_empty() {
            return Ok(stats);
        }
        debug!(requests = inbox.len(), "ProcessDispatcher::dispatch_once: called");

        let result = self.scan(&mut inbox, &mut stats).await;

        // Reverse so each channel keeps its original request order
        for request in inbox.into_iter().rev() {
            if self.channels.restore_request(request) {
                stats.restored += 1;
            }
        }

        if stats.dispatched > 0 || stats.races_lost > 0 {
            info!(
                dispatched = stats.dispatched,
                races_lost = stats.races_lost,
                restored = stats.restored,
                "Dispatch tick"
            );
        }
        result.map(|()| stats)
    }

    async fn scan(&self, inbox: &mut Vec<PendingRequest>, stats: &mut DispatchStats) -> StoreResult<()> {
        let mut offset = 0;
        while !inbox.is_empty() {
            let page = self.queue.next_enqueued(offset, self.config.batch_size).await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();
            let mut left_queue = 0;

            for entry in page {
                if inbox.is_empty() {
                    break;
                }
                stats.scanned += 1;

                let Some(index) = find_match(&entry, inbox, self.sink.as_ref()) else {
                    continue;
                };

                // Entries claimed here or elsewhere are no longer ENQUEUED
                left_queue += 1;
                if self.queue.claim(&entry.key, &inbox[index].worker_id).await? {
                    let request = inbox.remove(index);
                    self.deliver(entry, request).await?;
                    stats.dispatched += 1;
                } else {
                    debug!(process = %entry.key, "ProcessDispatcher::scan: claim lost");
                    stats.races_lost += 1;
                }
            }

            if fetched < self.config.batch_size {
                break;
            }
            offset += fetched - left_queue;
        }
        Ok(())
    }

    async fn deliver(&self, entry: QueueEntry, request: PendingRequest) -> StoreResult<()> {
        let response = Message::ProcessResponse {
            correlation_id: request.message.correlation_id(),
            process_key: entry.key,
            payload: entry.payload,
            resume_events: entry.resume_events,
        };

        if self.channels.send_message(&request.channel_id, response) {
            debug!(process = %entry.key, worker_id = %request.worker_id, "ProcessDispatcher::deliver: sent");
            return Ok(());
        }

        // Worker went away between poll and delivery; put the entry back for someone else
        warn!(process = %entry.key, worker_id = %request.worker_id, "Delivery failed, re-enqueueing");
        if !self
            .queue
            .update_expected_status(&entry.key, ProcessStatus::Starting, ProcessStatus::Enqueued)
            .await?
        {
            warn!(process = %entry.key, "Entry moved on before it could be re-enqueued");
        }
        Ok(())
    }

    /// Run dispatch ticks until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(interval_ms = self.config.poll_interval_ms, "ProcessDispatcher started");
        let mut interval = tokio::time::interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        error!(error = %e, "Process dispatch failed");
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.error_delay()) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("ProcessDispatcher stopped");
    }
}
