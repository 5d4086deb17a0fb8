//! Parent chat transcript entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message appended to a parent chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TranscriptMessage {
    /// Unique record identifier.
    pub id: String,
    /// Chat the message belongs to.
    pub chat_id: String,
    /// Author role (`assistant`, `system`, `user`).
    pub role: String,
    /// Message body.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TranscriptMessage {
    /// Build an assistant-authored message.
    #[must_use]
    pub fn assistant(chat_id: &str, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_owned(),
            role: "assistant".into(),
            content,
            created_at: Utc::now(),
        }
    }
}
