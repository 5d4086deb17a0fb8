//! Agent task repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::session::SessionStatus;
use crate::models::task::{Task, TaskKind, TaskStatus};
use crate::models::transcript::TranscriptMessage;
use crate::{AppError, Result};

use super::db::Database;
use super::session_repo::session_status_str;
use super::{fmt_ts, parse_opt_ts, parse_ts, to_u32};

/// Repository wrapper around `SQLite` for task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<Database>,
}

/// Terminal outcome written for a task and its session in one transaction.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// `Completed` or `Failed`.
    pub task_status: TaskStatus,
    /// Session status written alongside (`Completed`, `Failed` or `Stopped`).
    pub session_status: SessionStatus,
    /// Completion summary for the session.
    pub summary: Option<String>,
    /// Failure text for both records.
    pub error_message: Option<String>,
    /// Message appended to the parent transcript.
    pub transcript: Option<TranscriptMessage>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    pool_id: String,
    agent_session_id: Option<String>,
    goal: String,
    kind: String,
    priority: i64,
    status: String,
    auto_iterate: bool,
    max_iterations: i64,
    target_server_id: Option<String>,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            kind: parse_kind(&self.kind)?,
            status: parse_task_status(&self.status)?,
            priority: i32::try_from(self.priority)
                .map_err(|_| AppError::Db(format!("invalid priority: {}", self.priority)))?,
            max_iterations: to_u32("max_iterations", self.max_iterations)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            started_at: parse_opt_ts("started_at", self.started_at.as_deref())?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
            id: self.id,
            pool_id: self.pool_id,
            agent_session_id: self.agent_session_id,
            goal: self.goal,
            auto_iterate: self.auto_iterate,
            target_server_id: self.target_server_id,
            error_message: self.error_message,
        })
    }
}

fn parse_kind(s: &str) -> Result<TaskKind> {
    match s {
        "interactive" => Ok(TaskKind::Interactive),
        "background" => Ok(TaskKind::Background),
        other => Err(AppError::Db(format!("invalid task kind: {other}"))),
    }
}

fn kind_str(k: TaskKind) -> &'static str {
    match k {
        TaskKind::Interactive => "interactive",
        TaskKind::Background => "background",
    }
}

fn parse_task_status(s: &str) -> Result<TaskStatus> {
    match s {
        "queued" => Ok(TaskStatus::Queued),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "paused" => Ok(TaskStatus::Paused),
        other => Err(AppError::Db(format!("invalid task status: {other}"))),
    }
}

pub(crate) fn task_status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Paused => "paused",
    }
}

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new task record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, task: &Task) -> Result<Task> {
        sqlx::query(
            "INSERT INTO agent_task (id, pool_id, agent_session_id, goal, kind, priority, status,
             auto_iterate, max_iterations, target_server_id, error_message, created_at,
             started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&task.id)
        .bind(&task.pool_id)
        .bind(&task.agent_session_id)
        .bind(&task.goal)
        .bind(kind_str(task.kind))
        .bind(i64::from(task.priority))
        .bind(task_status_str(task.status))
        .bind(task.auto_iterate)
        .bind(i64::from(task.max_iterations))
        .bind(&task.target_server_id)
        .bind(&task.error_message)
        .bind(fmt_ts(task.created_at))
        .bind(task.started_at.map(fmt_ts))
        .bind(task.completed_at.map(fmt_ts))
        .execute(self.db.as_ref())
        .await?;

        Ok(task.clone())
    }

    /// Retrieve a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM agent_task WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// Retrieve a task by identifier, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub async fn require(&self, id: &str) -> Result<Task> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {id} not found")))
    }

    /// Attach the session that will drive a task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_session(&self, id: &str, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE agent_task SET agent_session_id = ?1 WHERE id = ?2")
            .bind(session_id)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Move a queued task to `running`, stamping `started_at`.
    ///
    /// The update only applies to a queued task that already references a
    /// session, so a `running` row always carries a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the task is not queued or has
    /// no session, or `AppError::Db` if the update fails.
    pub async fn mark_running(&self, id: &str) -> Result<Task> {
        let now = fmt_ts(Utc::now());
        let result = sqlx::query(
            "UPDATE agent_task SET status = 'running', started_at = ?1
             WHERE id = ?2 AND status = 'queued' AND agent_session_id IS NOT NULL",
        )
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidTransition(format!(
                "task {id} is not a queued task with a session"
            )));
        }
        self.require(id).await
    }

    /// Update task status, respecting the state machine.
    ///
    /// The write only applies while the task still has the status it was
    /// checked against.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the transition is not allowed
    /// or the task changed status concurrently, or `AppError::Db` if
    /// persistence fails.
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let current = self.require(id).await?;
        if !current.can_transition_to(status) {
            return Err(AppError::InvalidTransition(format!(
                "task {id}: {} -> {}",
                task_status_str(current.status),
                task_status_str(status)
            )));
        }

        let result =
            sqlx::query("UPDATE agent_task SET status = ?1 WHERE id = ?2 AND status = ?3")
                .bind(task_status_str(status))
                .bind(id)
                .bind(task_status_str(current.status))
                .execute(self.db.as_ref())
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidTransition(format!(
                "task {id} changed status concurrently"
            )));
        }
        self.require(id).await
    }

    /// Write a terminal outcome for a running task, its session and the
    /// parent transcript in a single transaction.
    ///
    /// Returns `false` without writing anything if the task is no longer
    /// running (already finished by another path).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any statement fails; nothing is committed.
    pub async fn finish(&self, id: &str, outcome: &TaskOutcome) -> Result<bool> {
        let now = fmt_ts(Utc::now());
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query(
            "UPDATE agent_task SET status = ?1, error_message = ?2, completed_at = ?3
             WHERE id = ?4 AND status = 'running'",
        )
        .bind(task_status_str(outcome.task_status))
        .bind(&outcome.error_message)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // Session terminal write is skipped if the session already ended
        // (e.g. stopped by an operator).
        sqlx::query(
            "UPDATE agent_session SET status = ?1, summary = COALESCE(?2, summary),
             error_message = COALESCE(?3, error_message), updated_at = ?4, completed_at = ?4
             WHERE id = (SELECT agent_session_id FROM agent_task WHERE id = ?5)
               AND status NOT IN ('completed', 'failed', 'stopped')",
        )
        .bind(session_status_str(outcome.session_status))
        .bind(&outcome.summary)
        .bind(&outcome.error_message)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if let Some(ref message) = outcome.transcript {
            sqlx::query(
                "INSERT INTO transcript_message (id, chat_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&message.id)
            .bind(&message.chat_id)
            .bind(&message.role)
            .bind(&message.content)
            .bind(fmt_ts(message.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Fail a task that has not started (`queued` or `paused`).
    ///
    /// Returns `false` if the task was launched or finished meanwhile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn cancel_waiting(&self, id: &str, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent_task SET status = 'failed', error_message = ?1, completed_at = ?2
             WHERE id = ?3 AND status IN ('queued', 'paused')",
        )
        .bind(reason)
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail a task whatever its non-terminal status; no-op on terminal tasks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn force_fail(&self, id: &str, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent_task SET status = 'failed', error_message = ?1, completed_at = ?2
             WHERE id = ?3 AND status NOT IN ('completed', 'failed')",
        )
        .bind(reason)
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Queued tasks of a pool in launch order: priority descending, then
    /// creation time ascending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_queued(&self, pool_id: &str, limit: u32) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM agent_task WHERE pool_id = ?1 AND status = 'queued'
             ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ?2",
        )
        .bind(pool_id)
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Pools that have at least one queued task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn pools_with_queued(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT pool_id FROM agent_task WHERE status = 'queued' ORDER BY pool_id",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Running tasks of a pool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_running(&self, pool_id: &str) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM agent_task WHERE pool_id = ?1 AND status = 'running'
             ORDER BY started_at ASC",
        )
        .bind(pool_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Count running tasks of a pool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_running(&self, pool_id: &str) -> Result<u32> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM agent_task WHERE pool_id = ?1 AND status = 'running'",
        )
        .bind(pool_id)
        .fetch_one(self.db.as_ref())
        .await?;
        to_u32("count", row.0)
    }

    /// Running and queued tasks of a pool, running first then launch order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active(&self, pool_id: &str) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM agent_task WHERE pool_id = ?1 AND status IN ('running', 'queued')
             ORDER BY CASE status WHEN 'running' THEN 0 ELSE 1 END,
                      priority DESC, created_at ASC, rowid ASC",
        )
        .bind(pool_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// All tasks of a pool in creation order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_pool(&self, pool_id: &str) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM agent_task WHERE pool_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(pool_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }
}
