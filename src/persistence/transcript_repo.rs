//! Parent chat transcript repository.

use std::sync::Arc;

use crate::models::transcript::TranscriptMessage;
use crate::Result;

use super::db::Database;
use super::{fmt_ts, parse_ts};

/// Repository wrapper around `SQLite` for transcript messages.
#[derive(Clone)]
pub struct TranscriptRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    role: String,
    content: String,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<TranscriptMessage> {
        Ok(TranscriptMessage {
            created_at: parse_ts("created_at", &self.created_at)?,
            id: self.id,
            chat_id: self.chat_id,
            role: self.role,
            content: self.content,
        })
    }
}

impl TranscriptRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn append(&self, message: &TranscriptMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO transcript_message (id, chat_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(fmt_ts(message.created_at))
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Messages of a chat in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_chat(&self, chat_id: &str) -> Result<Vec<TranscriptMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM transcript_message WHERE chat_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(chat_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }
}
