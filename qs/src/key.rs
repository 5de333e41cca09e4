//! Process keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time truncated to whole milliseconds
///
/// Both backends persist timestamps as Unix milliseconds, so keys are
/// created at that precision to survive a round trip unchanged.
pub fn now_ms() -> DateTime<Utc> {
    truncate_ms(Utc::now())
}

pub(crate) fn truncate_ms(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Identity of a process: instance id plus creation time
///
/// The creation timestamp travels with the id so that partitioned storage can
/// locate the row without a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessKey {
    pub instance_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ProcessKey {
    /// Create a fresh key
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::now_v7(),
            created_at: now_ms(),
        }
    }

    /// Create a key from its parts; `created_at` is truncated to milliseconds
    pub fn from_parts(instance_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            created_at: truncate_ms(created_at),
        }
    }

    /// Rebuild a key from persisted columns
    pub(crate) fn from_columns(instance_id: &str, created_at_ms: i64) -> Option<Self> {
        let instance_id = Uuid::parse_str(instance_id).ok()?;
        let created_at = DateTime::from_timestamp_millis(created_at_ms)?;
        Some(Self {
            instance_id,
            created_at,
        })
    }
}

impl Default for ProcessKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_survives_millisecond_columns() {
        let key = ProcessKey::new();
        let rebuilt = ProcessKey::from_columns(&key.instance_id.to_string(), key.created_at.timestamp_millis());
        assert_eq!(rebuilt, Some(key));
    }

    #[test]
    fn test_from_columns_rejects_bad_uuid() {
        assert!(ProcessKey::from_columns("not-a-uuid", 0).is_none());
    }

    #[test]
    fn test_display_is_instance_id() {
        let key = ProcessKey::new();
        assert_eq!(key.to_string(), key.instance_id.to_string());
    }
}
