//! Channel messages and their wire envelope

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::error::ChannelError;
use crate::domain::{Capabilities, ProcessKey};

/// The four message kinds: {COMMAND, PROCESS} x {REQUEST, RESPONSE}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    CommandRequest,
    CommandResponse,
    ProcessRequest,
    ProcessResponse,
}

impl MessageType {
    /// Requests flow worker -> coordinator, responses the other way
    pub fn is_request(&self) -> bool {
        matches!(self, Self::CommandRequest | Self::ProcessRequest)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandRequest => write!(f, "COMMAND_REQUEST"),
            Self::CommandResponse => write!(f, "COMMAND_RESPONSE"),
            Self::ProcessRequest => write!(f, "PROCESS_REQUEST"),
            Self::ProcessResponse => write!(f, "PROCESS_RESPONSE"),
        }
    }
}

/// Wire form of every message: `{type, correlationId, payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub payload: Value,
}

/// A message exchanged over a worker channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Envelope", try_from = "Envelope")]
pub enum Message {
    /// Worker asks for a process it can run
    ProcessRequest {
        correlation_id: Uuid,
        capabilities: Capabilities,
    },

    /// Coordinator hands a claimed process to the worker
    ProcessResponse {
        correlation_id: Uuid,
        process_key: ProcessKey,
        payload: Value,
        resume_events: BTreeSet<String>,
    },

    /// Worker asks for pending commands addressed to it
    CommandRequest { correlation_id: Uuid, agent_id: String },

    /// Coordinator delivers a command
    CommandResponse { correlation_id: Uuid, payload: Value },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequestBody {
    #[serde(default)]
    capabilities: Capabilities,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessResponseBody {
    process_key: ProcessKey,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    resume_events: BTreeSet<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequestBody {
    agent_id: String,
}

impl Message {
    pub fn process_request(capabilities: Capabilities) -> Self {
        Self::ProcessRequest {
            correlation_id: Uuid::now_v7(),
            capabilities,
        }
    }

    pub fn command_request(agent_id: impl Into<String>) -> Self {
        Self::CommandRequest {
            correlation_id: Uuid::now_v7(),
            agent_id: agent_id.into(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ProcessRequest { .. } => MessageType::ProcessRequest,
            Self::ProcessResponse { .. } => MessageType::ProcessResponse,
            Self::CommandRequest { .. } => MessageType::CommandRequest,
            Self::CommandResponse { .. } => MessageType::CommandResponse,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            Self::ProcessRequest { correlation_id, .. }
            | Self::ProcessResponse { correlation_id, .. }
            | Self::CommandRequest { correlation_id, .. }
            | Self::CommandResponse { correlation_id, .. } => *correlation_id,
        }
    }

    /// Serialize to the JSON wire envelope
    pub fn to_wire(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Wire(e.to_string()))
    }

    /// Parse a JSON wire envelope
    pub fn from_wire(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::Wire(e.to_string()))
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        let message_type = message.message_type();
        let correlation_id = message.correlation_id();
        let payload = match message {
            Message::ProcessRequest { capabilities, .. } => json!({ "capabilities": capabilities }),
            Message::ProcessResponse {
                process_key,
                payload,
                resume_events,
                ..
            } => json!({
                "processKey": process_key,
                "payload": payload,
                "resumeEvents": resume_events,
            }),
            Message::CommandRequest { agent_id, .. } => json!({ "agentId": agent_id }),
            Message::CommandResponse { payload, .. } => payload,
        };
        Envelope {
            message_type,
            correlation_id,
            payload,
        }
    }
}

impl TryFrom<Envelope> for Message {
    type Error = ChannelError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope {
            message_type,
            correlation_id,
            payload,
        } = envelope;
        let wire = |e: serde_json::Error| ChannelError::Wire(format!("{} payload: {}", message_type, e));

        Ok(match message_type {
            MessageType::ProcessRequest => {
                let body: ProcessRequestBody = serde_json::from_value(payload).map_err(wire)?;
                Self::ProcessRequest {
                    correlation_id,
                    capabilities: body.capabilities,
                }
            }
            MessageType::ProcessResponse => {
                let body: ProcessResponseBody = serde_json::from_value(payload).map_err(wire)?;
                Self::ProcessResponse {
                    correlation_id,
                    process_key: body.process_key,
                    payload: body.payload,
                    resume_events: body.resume_events,
                }
            }
            MessageType::CommandRequest => {
                let body: CommandRequestBody = serde_json::from_value(payload).map_err(wire)?;
                Self::CommandRequest {
                    correlation_id,
                    agent_id: body.agent_id,
                }
            }
            MessageType::CommandResponse => Self::CommandResponse {
                correlation_id,
                payload,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_request_wire_shape() {
        let caps = Capabilities::from([("flavor".to_string(), "default".to_string())]);
        let msg = Message::process_request(caps);
        let value: Value = serde_json::from_str(&msg.to_wire().unwrap()).unwrap();

        assert_eq!(value["type"], "PROCESS_REQUEST");
        assert_eq!(value["correlationId"], msg.correlation_id().to_string());
        assert_eq!(value["payload"]["capabilities"]["flavor"], "default");
    }

    #[test]
    fn test_command_response_payload_is_verbatim() {
        let msg = Message::CommandResponse {
            correlation_id: Uuid::now_v7(),
            payload: json!({"type": "CANCEL_JOB", "instanceId": "abc"}),
        };
        let envelope = Envelope::from(msg.clone());
        assert_eq!(envelope.payload["type"], "CANCEL_JOB");
        assert_eq!(Message::try_from(envelope).unwrap(), msg);
    }

    #[test]
    fn test_bad_payload_is_wire_error() {
        let text = json!({
            "type": "COMMAND_REQUEST",
            "correlationId": Uuid::now_v7(),
            "payload": {"nope": 1},
        })
        .to_string();
        assert!(matches!(Message::from_wire(&text), Err(ChannelError::Wire(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let text = r#"{"type":"HEARTBEAT","correlationId":"0190a0a0-0000-7000-8000-000000000000","payload":null}"#;
        assert!(Message::from_wire(text).is_err());
    }

    #[test]
    fn test_request_types() {
        assert!(MessageType::ProcessRequest.is_request());
        assert!(MessageType::CommandRequest.is_request());
        assert!(!MessageType::ProcessResponse.is_request());
    }
}
