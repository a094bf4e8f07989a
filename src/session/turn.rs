//! Conversation turn model.
//!
//! Turns are ephemeral: only a bounded window of recent turns is passed
//! into generation; older exchanges are expected to live on as memories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    /// The user.
    User,
    /// The companion.
    Companion,
}

/// A single conversation turn.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Speaker role.
    pub role: ConversationRole,
    /// Message content.
    pub content: String,
    /// Timestamp for ordering.
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Build a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build a companion turn.
    #[must_use]
    pub fn companion(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::Companion,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
