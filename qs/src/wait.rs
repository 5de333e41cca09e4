//! Wait conditions and waiting-process records

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::key::ProcessKey;
use super::status::ProcessStatus;

/// Tag of a wait condition, used to look up its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitKind {
    ProcessSleep,
    ProcessCompletion,
    EventSet,
    ExternalSignal,
}

impl std::fmt::Display for WaitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessSleep => write!(f, "PROCESS_SLEEP"),
            Self::ProcessCompletion => write!(f, "PROCESS_COMPLETION"),
            Self::EventSet => write!(f, "EVENT_SET"),
            Self::ExternalSignal => write!(f, "EXTERNAL_SIGNAL"),
        }
    }
}

/// How many awaited processes must finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompleteCondition {
    #[default]
    All,
    OneOf,
}

/// How many awaited events must arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventMode {
    #[default]
    All,
    Any,
}

fn default_final_statuses() -> BTreeSet<ProcessStatus> {
    ProcessStatus::FINAL.into_iter().collect()
}

/// What must become true before a suspended process resumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum WaitCondition {
    /// Resume at a point in time
    ProcessSleep {
        until: DateTime<Utc>,
        #[serde(default)]
        resume_event: Option<String>,
        #[serde(default)]
        exclusive: bool,
    },

    /// Resume when other processes reach a final status
    ProcessCompletion {
        processes: BTreeSet<Uuid>,
        #[serde(default)]
        complete_condition: CompleteCondition,
        #[serde(default = "default_final_statuses")]
        final_statuses: BTreeSet<ProcessStatus>,
        #[serde(default)]
        resume_event: Option<String>,
        #[serde(default)]
        exclusive: bool,
    },

    /// Resume when named events have been delivered to the process
    EventSet {
        pending: BTreeSet<String>,
        #[serde(default)]
        mode: EventMode,
        #[serde(default)]
        resume_event: Option<String>,
        #[serde(default)]
        exclusive: bool,
    },

    /// Resume when an external caller raises a signal for the process
    ExternalSignal {
        signal: String,
        #[serde(default)]
        resume_event: Option<String>,
        #[serde(default)]
        exclusive: bool,
    },
}

impl WaitCondition {
    /// Sleep until `until`
    pub fn sleep(until: DateTime<Utc>) -> Self {
        Self::ProcessSleep {
            until,
            resume_event: None,
            exclusive: false,
        }
    }

    /// Wait for every process in `processes` to finish
    pub fn completion(processes: impl IntoIterator<Item = Uuid>) -> Self {
        Self::ProcessCompletion {
            processes: processes.into_iter().collect(),
            complete_condition: CompleteCondition::All,
            final_statuses: default_final_statuses(),
            resume_event: None,
            exclusive: false,
        }
    }

    /// Wait for every event in `events`
    pub fn events(events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::EventSet {
            pending: events.into_iter().map(Into::into).collect(),
            mode: EventMode::All,
            resume_event: None,
            exclusive: false,
        }
    }

    /// Wait for an external signal
    pub fn signal(signal: impl Into<String>) -> Self {
        Self::ExternalSignal {
            signal: signal.into(),
            resume_event: None,
            exclusive: false,
        }
    }

    /// Set the event reported to the process when this condition resolves
    pub fn with_resume_event(mut self, event: impl Into<String>) -> Self {
        let event = Some(event.into());
        match &mut self {
            Self::ProcessSleep { resume_event, .. }
            | Self::ProcessCompletion { resume_event, .. }
            | Self::EventSet { resume_event, .. }
            | Self::ExternalSignal { resume_event, .. } => *resume_event = event,
        }
        self
    }

    /// Mark the condition exclusive
    pub fn exclusive(mut self) -> Self {
        match &mut self {
            Self::ProcessSleep { exclusive, .. }
            | Self::ProcessCompletion { exclusive, .. }
            | Self::EventSet { exclusive, .. }
            | Self::ExternalSignal { exclusive, .. } => *exclusive = true,
        }
        self
    }

    pub fn kind(&self) -> WaitKind {
        match self {
            Self::ProcessSleep { .. } => WaitKind::ProcessSleep,
            Self::ProcessCompletion { .. } => WaitKind::ProcessCompletion,
            Self::EventSet { .. } => WaitKind::EventSet,
            Self::ExternalSignal { .. } => WaitKind::ExternalSignal,
        }
    }

    pub fn resume_event(&self) -> Option<&str> {
        match self {
            Self::ProcessSleep { resume_event, .. }
            | Self::ProcessCompletion { resume_event, .. }
            | Self::EventSet { resume_event, .. }
            | Self::ExternalSignal { resume_event, .. } => resume_event.as_deref(),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        match self {
            Self::ProcessSleep { exclusive, .. }
            | Self::ProcessCompletion { exclusive, .. }
            | Self::EventSet { exclusive, .. }
            | Self::ExternalSignal { exclusive, .. } => *exclusive,
        }
    }
}

/// A process suspended on one or more wait conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingProcess {
    pub key: ProcessKey,

    /// Monotonic id, the watchdog's cursor space
    pub seq_id: i64,

    pub is_waiting: bool,

    pub waits: Vec<WaitCondition>,

    /// Guards `set_wait` against concurrent writers
    pub version: i64,
}
