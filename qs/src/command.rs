//! Agent commands (e.g. cancel a running process)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery status of an agent command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    #[default]
    Created,
    Sent,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Sent => "SENT",
        }
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "SENT" => Ok(Self::Sent),
            _ => Err(format!("Unknown command status: {}", s)),
        }
    }
}

/// A command addressed to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCommand {
    pub command_id: Uuid,
    pub agent_id: String,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}
