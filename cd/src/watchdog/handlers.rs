//! Built-in wait handlers

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::handler::{HandlerError, HandlerOutcome, HandlerTable, WaitHandler};
use super::signals::SignalBoard;
use crate::domain::{CompleteCondition, EventMode, ProcessKey, ProcessStatus, QueueStore, WaitCondition, WaitKind};

/// Table with every built-in handler
pub fn builtin_handlers(queue: Arc<dyn QueueStore>, signals: Arc<SignalBoard>, status_query_limit: usize) -> HandlerTable {
    HandlerTable::new()
        .with(Box::new(SleepHandler))
        .with(Box::new(ProcessCompletionHandler::new(queue, status_query_limit)))
        .with(Box::new(EventSetHandler::new(signals.clone())))
        .with(Box::new(ExternalSignalHandler::new(signals)))
}

fn wrong_kind(expected: WaitKind, condition: &WaitCondition) -> HandlerError {
    HandlerError::WrongKind {
        expected,
        found: condition.kind(),
    }
}

/// Resolves once the wall clock passes `until`
pub struct SleepHandler;

#[async_trait]
impl WaitHandler for SleepHandler {
    fn kind(&self) -> WaitKind {
        WaitKind::ProcessSleep
    }

    async fn evaluate(&self, _key: &ProcessKey, condition: &WaitCondition) -> Result<HandlerOutcome, HandlerError> {
        let WaitCondition::ProcessSleep { until, .. } = condition else {
            return Err(wrong_kind(self.kind(), condition));
        };
        if *until <= Utc::now() {
            Ok(HandlerOutcome::Resolved(condition.resume_event().map(String::from)))
        } else {
            Ok(HandlerOutcome::Unchanged)
        }
    }
}

/// Waits for other processes to reach a final status
///
/// A process the store no longer knows counts as finished. With ALL, finished
/// processes are dropped from the condition until none remain; with ONE_OF
/// the first finished process resolves it.
pub struct ProcessCompletionHandler {
    queue: Arc<dyn QueueStore>,
    status_query_limit: usize,
}

impl ProcessCompletionHandler {
    pub fn new(queue: Arc<dyn QueueStore>, status_query_limit: usize) -> Self {
        Self {
            queue,
            status_query_limit: status_query_limit.max(1),
        }
    }

    async fn statuses(&self, processes: &BTreeSet<Uuid>) -> Result<HashMap<Uuid, Option<ProcessStatus>>, HandlerError> {
        let ids: Vec<Uuid> = processes.iter().copied().collect();
        let mut statuses = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(self.status_query_limit) {
            statuses.extend(self.queue.find_statuses(chunk).await?);
        }
        Ok(statuses)
    }
}

#[async_trait]
impl WaitHandler for ProcessCompletionHandler {
    fn kind(&self) -> WaitKind {
        WaitKind::ProcessCompletion
    }

    async fn evaluate(&self, key: &ProcessKey, condition: &WaitCondition) -> Result<HandlerOutcome, HandlerError> {
        let WaitCondition::ProcessCompletion {
            processes,
            complete_condition,
            final_statuses,
            ..
        } = condition
        else {
            return Err(wrong_kind(self.kind(), condition));
        };

        let resolved = || Ok(HandlerOutcome::Resolved(condition.resume_event().map(String::from)));
        if processes.is_empty() {
            return resolved();
        }

        let statuses = self.statuses(processes).await?;
        let is_finished = |id: &Uuid| match statuses.get(id) {
            Some(Some(status)) => final_statuses.contains(status),
            // Missing from the store
            Some(None) | None => true,
        };

        match complete_condition {
            CompleteCondition::OneOf => {
                if processes.iter().any(is_finished) {
                    resolved()
                } else {
                    Ok(HandlerOutcome::Unchanged)
                }
            }
            CompleteCondition::All => {
                let unfinished: BTreeSet<Uuid> = processes.iter().filter(|id| !is_finished(*id)).copied().collect();
                if unfinished.is_empty() {
                    resolved()
                } else if unfinished.len() == processes.len() {
                    Ok(HandlerOutcome::Unchanged)
                } else {
                    debug!(%key, remaining = unfinished.len(), "ProcessCompletionHandler::evaluate: narrowing");
                    let mut narrowed = condition.clone();
                    if let WaitCondition::ProcessCompletion { processes, .. } = &mut narrowed {
                        *processes = unfinished;
                    }
                    Ok(HandlerOutcome::Rewritten(narrowed))
                }
            }
        }
    }
}

/// Waits for named events raised on the [`SignalBoard`]
pub struct EventSetHandler {
    signals: Arc<SignalBoard>,
}

impl EventSetHandler {
    pub fn new(signals: Arc<SignalBoard>) -> Self {
        Self { signals }
    }
}

#[async_trait]
impl WaitHandler for EventSetHandler {
    fn kind(&self) -> WaitKind {
        WaitKind::EventSet
    }

    async fn evaluate(&self, key: &ProcessKey, condition: &WaitCondition) -> Result<HandlerOutcome, HandlerError> {
        let WaitCondition::EventSet { pending, mode, .. } = condition else {
            return Err(wrong_kind(self.kind(), condition));
        };

        let arrived = self.signals.raised_among(key, pending);
        let remaining: BTreeSet<String> = pending.difference(&arrived).cloned().collect();
        let done = match mode {
            EventMode::All => remaining.is_empty(),
            EventMode::Any => !arrived.is_empty() || pending.is_empty(),
        };

        if done {
            Ok(HandlerOutcome::Resolved(condition.resume_event().map(String::from)))
        } else if arrived.is_empty() || *mode == EventMode::Any {
            Ok(HandlerOutcome::Unchanged)
        } else {
            let mut narrowed = condition.clone();
            if let WaitCondition::EventSet { pending, .. } = &mut narrowed {
                *pending = remaining;
            }
            Ok(HandlerOutcome::Rewritten(narrowed))
        }
    }
}

/// Waits for a single named signal raised on the [`SignalBoard`]
pub struct ExternalSignalHandler {
    signals: Arc<SignalBoard>,
}

impl ExternalSignalHandler {
    pub fn new(signals: Arc<SignalBoard>) -> Self {
        Self { signals }
    }
}

#[async_trait]
impl WaitHandler for ExternalSignalHandler {
    fn kind(&self) -> WaitKind {
        WaitKind::ExternalSignal
    }

    async fn evaluate(&self, key: &ProcessKey, condition: &WaitCondition) -> Result<HandlerOutcome, HandlerError> {
        let WaitCondition::ExternalSignal { signal, .. } = condition else {
            return Err(wrong_kind(self.kind(), condition));
        };
        if self.signals.is_raised(key, signal) {
            Ok(HandlerOutcome::Resolved(condition.resume_event().map(String::from)))
        } else {
            Ok(HandlerOutcome::Unchanged)
        }
    }
}
