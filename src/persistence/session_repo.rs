//! Agent session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::session::{Session, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::{fmt_ts, parse_opt_ts, parse_ts, to_u32};

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    chat_id: Option<String>,
    pool_id: Option<String>,
    user_id: String,
    target_server_id: Option<String>,
    goal: String,
    status: String,
    auto_approve: bool,
    max_steps: i64,
    current_step_number: i64,
    error_message: Option<String>,
    summary: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            status: parse_session_status(&self.status)?,
            max_steps: to_u32("max_steps", self.max_steps)?,
            current_step_number: to_u32("current_step_number", self.current_step_number)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
            id: self.id,
            chat_id: self.chat_id,
            pool_id: self.pool_id,
            user_id: self.user_id,
            target_server_id: self.target_server_id,
            goal: self.goal,
            auto_approve: self.auto_approve,
            error_message: self.error_message,
            summary: self.summary,
        })
    }
}

fn parse_session_status(s: &str) -> Result<SessionStatus> {
    match s {
        "idle" => Ok(SessionStatus::Idle),
        "thinking" => Ok(SessionStatus::Thinking),
        "awaiting_approval" => Ok(SessionStatus::AwaitingApproval),
        "executing" => Ok(SessionStatus::Executing),
        "analyzing" => Ok(SessionStatus::Analyzing),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        "stopped" => Ok(SessionStatus::Stopped),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

pub(crate) fn session_status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Idle => "idle",
        SessionStatus::Thinking => "thinking",
        SessionStatus::AwaitingApproval => "awaiting_approval",
        SessionStatus::Executing => "executing",
        SessionStatus::Analyzing => "analyzing",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Stopped => "stopped",
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        sqlx::query(
            "INSERT INTO agent_session (id, chat_id, pool_id, user_id, target_server_id, goal,
             status, auto_approve, max_steps, current_step_number, error_message, summary,
             created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&session.id)
        .bind(&session.chat_id)
        .bind(&session.pool_id)
        .bind(&session.user_id)
        .bind(&session.target_server_id)
        .bind(&session.goal)
        .bind(session_status_str(session.status))
        .bind(session.auto_approve)
        .bind(i64::from(session.max_steps))
        .bind(i64::from(session.current_step_number))
        .bind(&session.error_message)
        .bind(&session.summary)
        .bind(fmt_ts(session.created_at))
        .bind(fmt_ts(session.updated_at))
        .bind(session.completed_at.map(fmt_ts))
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM agent_session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Retrieve a session by identifier, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn require(&self, id: &str) -> Result<Session> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
    }

    /// Update session status, respecting the state machine.
    ///
    /// The write is a compare-and-set against the status that was validated,
    /// so a concurrent stop is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the transition is not allowed
    /// or lost a race, or `AppError::Db` if persistence fails.
    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        self.transition(id, status, None, None).await
    }

    /// Mark a session completed with a summary.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the session cannot complete.
    pub async fn complete(&self, id: &str, summary: &str) -> Result<Session> {
        self.transition(id, SessionStatus::Completed, Some(summary), None)
            .await
    }

    /// Mark a session failed with an error message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the session already ended.
    pub async fn fail(&self, id: &str, error_message: &str) -> Result<Session> {
        self.transition(id, SessionStatus::Failed, None, Some(error_message))
            .await
    }

    /// Stop a session. Stopping a terminal session is a no-op.
    ///
    /// Returns the session and whether this call changed its status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if persistence fails.
    pub async fn stop(&self, id: &str) -> Result<(Session, bool)> {
        let now = fmt_ts(Utc::now());
        let result = sqlx::query(
            "UPDATE agent_session SET status = 'stopped', updated_at = ?1, completed_at = ?1
             WHERE id = ?2 AND status NOT IN ('completed', 'failed', 'stopped')",
        )
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        let session = self.require(id).await?;
        Ok((session, result.rows_affected() > 0))
    }

    /// Sessions that are not in a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_non_terminal(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM agent_session
             WHERE status NOT IN ('completed', 'failed', 'stopped')
             ORDER BY created_at ASC",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    async fn transition(
        &self,
        id: &str,
        status: SessionStatus,
        summary: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<Session> {
        let current = self.require(id).await?;
        if !current.can_transition_to(status) {
            return Err(AppError::InvalidTransition(format!(
                "session {id}: {} -> {}",
                session_status_str(current.status),
                session_status_str(status)
            )));
        }

        let now = fmt_ts(Utc::now());
        let completed_at = status.is_terminal().then(|| now.clone());
        let result = sqlx::query(
            "UPDATE agent_session SET status = ?1, summary = COALESCE(?2, summary),
             error_message = COALESCE(?3, error_message), updated_at = ?4,
             completed_at = COALESCE(?5, completed_at)
             WHERE id = ?6 AND status = ?7",
        )
        .bind(session_status_str(status))
        .bind(summary)
        .bind(error_message)
        .bind(&now)
        .bind(&completed_at)
        .bind(id)
        .bind(session_status_str(current.status))
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidTransition(format!(
                "session {id} changed status concurrently"
            )));
        }

        self.require(id).await
    }
}
