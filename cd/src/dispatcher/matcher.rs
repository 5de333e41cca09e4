//! Requirement matching
//!
//! An entry's requirement map nests capability paths under the `agent` key:
//!
//! ```yaml
//! agent:
//!   flavor: ["default", "gpu-.*"]
//!   os:
//!     family: linux
//! ```
//!
//! flattens to `flavor -> [default, gpu-.*]` and `os.family -> [linux]`. A
//! request satisfies the entry when, for every path the worker reports, one
//! of the patterns matches the whole value. Paths the worker does not report
//! are unconstrained.

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use super::sink::ErrorSink;
use crate::channel::{Message, PendingRequest};
use crate::domain::{Capabilities, QueueEntry};

/// Top-level requirement key holding worker capability constraints
pub const AGENT_NAMESPACE: &str = "agent";

/// Why an entry's requirements cannot be used
#[derive(Debug, Error)]
pub enum RequirementError {
    #[error("Requirements must be a map, got {0}")]
    NotAMap(&'static str),

    #[error("Requirement {path} must be a pattern string or a list of pattern strings")]
    NonStringPattern { path: String },

    #[error("Requirement {path} has an invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        path: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct Rule {
    path: String,
    patterns: Vec<Regex>,
}

impl Rule {
    fn accepts(&self, capabilities: &Capabilities) -> bool {
        match capabilities.get(&self.path) {
            Some(value) => self.patterns.iter().any(|p| p.is_match(value)),
            None => true,
        }
    }
}

/// An entry's requirements with every pattern compiled and anchored
#[derive(Debug, Clone, Default)]
pub struct CompiledRequirements {
    rules: Vec<Rule>,
}

impl CompiledRequirements {
    pub fn compile(requirements: &Value) -> Result<Self, RequirementError> {
        let root = match requirements {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => return Err(RequirementError::NotAMap(kind(other))),
        };

        let mut rules = Vec::new();
        match root.get(AGENT_NAMESPACE) {
            None | Some(Value::Null) => {}
            Some(Value::Object(agent)) => flatten("", agent, &mut rules)?,
            Some(other) => return Err(RequirementError::NotAMap(kind(other))),
        }
        Ok(Self { rules })
    }

    /// Every reported capability is accepted by its rule
    pub fn matches(&self, capabilities: &Capabilities) -> bool {
        self.rules.iter().all(|rule| rule.accepts(capabilities))
    }

    pub fn is_unconstrained(&self) -> bool {
        self.rules.is_empty()
    }

    /// Flattened capability paths, in declaration order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.path.as_str())
    }
}

fn flatten(prefix: &str, map: &Map<String, Value>, rules: &mut Vec<Rule>) -> Result<(), RequirementError> {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        let sources: Vec<&str> = match value {
            Value::Object(nested) => {
                flatten(&path, nested, rules)?;
                continue;
            }
            Value::String(pattern) => vec![pattern.as_str()],
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().ok_or_else(|| RequirementError::NonStringPattern { path: path.clone() }))
                .collect::<Result<_, _>>()?,
            _ => return Err(RequirementError::NonStringPattern { path }),
        };

        // An empty list declares the key without constraining it
        if sources.is_empty() {
            continue;
        }

        let patterns = sources
            .into_iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| RequirementError::InvalidPattern {
                    path: path.clone(),
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rules.push(Rule { path, patterns });
    }
    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Capabilities carried by a process request
pub fn request_capabilities(message: &Message) -> Option<&Capabilities> {
    match message {
        Message::ProcessRequest { capabilities, .. } => Some(capabilities),
        _ => None,
    }
}

/// Index of the first request whose capabilities satisfy `entry`
///
/// Invalid requirements are reported to `sink` and yield `None`; they never
/// abort the caller's scan.
pub fn find_match(entry: &QueueEntry, requests: &[PendingRequest], sink: &dyn ErrorSink) -> Option<usize> {
    let compiled = match CompiledRequirements::compile(&entry.requirements) {
        Ok(compiled) => compiled,
        Err(e) => {
            sink.report(&entry.key, &e);
            return None;
        }
    };

    requests.iter().position(|request| {
        request_capabilities(&request.message).is_some_and(|capabilities| compiled.matches(capabilities))
    })
}
