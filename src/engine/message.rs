//! Message model — the single input shape the engine ingests.
//!
//! Defines [`Role`] (who produced a message) and [`Message`] (an immutable
//! transcript record). Messages are validated once at the boundary; a message
//! with empty content is rejected with [`EngineError::InvalidMessage`] before
//! any subsystem state is touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A single transcript message. Immutable once ingested; downstream
/// structures reference it by id rather than copying where possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// UUID v7 (time-sortable) identifier, assigned by the caller or via
    /// [`Message::new`].
    pub id: String,
    pub role: Role,
    /// Full text content. Never empty after validation.
    pub content: String,
    /// Capture time, RFC 3339 in serialized form.
    pub timestamp: DateTime<Utc>,
    /// Opaque host metadata (e.g. image enrichment results). The engine
    /// carries this through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Build a message with a fresh UUID v7 and the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Boundary validation: content must be non-empty and the id non-blank.
    pub fn validate(&self) -> EngineResult<()> {
        if self.content.trim().is_empty() {
            return Err(EngineError::invalid_message("empty content"));
        }
        if self.id.trim().is_empty() {
            return Err(EngineError::invalid_message("blank message id"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
        assert!(Role::from_str("robot").is_err());
    }

    #[test]
    fn empty_content_is_rejected() {
        let msg = Message::new(Role::User, "   ");
        assert!(matches!(
            msg.validate(),
            Err(EngineError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn valid_message_passes() {
        let msg = Message::new(Role::User, "What is Rust?");
        assert!(msg.validate().is_ok());
        assert!(!msg.id.is_empty());
    }
}
