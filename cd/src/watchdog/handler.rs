//! Wait handler contract and the kind -> handler table

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ProcessKey, StoreError, WaitCondition, WaitKind};

/// What a handler decided about one condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Still waiting, nothing to persist
    Unchanged,
    /// Still waiting on a narrower condition
    Rewritten(WaitCondition),
    /// Satisfied; carries the condition's resume event, if it names one
    Resolved(Option<String>),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Handler for {expected} received a {found} condition")]
    WrongKind { expected: WaitKind, found: WaitKind },
}

/// Evaluates one kind of wait condition
#[async_trait]
pub trait WaitHandler: Send + Sync {
    fn kind(&self) -> WaitKind;

    async fn evaluate(&self, key: &ProcessKey, condition: &WaitCondition) -> Result<HandlerOutcome, HandlerError>;
}

/// Handlers keyed by the condition tag they evaluate
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<WaitKind, Box<dyn WaitHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler, replacing any previous one for the same kind
    pub fn register(&mut self, handler: Box<dyn WaitHandler>) -> Option<Box<dyn WaitHandler>> {
        self.handlers.insert(handler.kind(), handler)
    }

    pub fn with(mut self, handler: Box<dyn WaitHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: WaitKind) -> Option<&dyn WaitHandler> {
        self.handlers.get(&kind).map(|h| h.as_ref())
    }

    pub fn kinds(&self) -> Vec<WaitKind> {
        let mut kinds: Vec<WaitKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable").field("kinds", &self.kinds()).finish()
    }
}
