//! Session step repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::action::AgentAction;
use crate::models::step::{Step, StepStatus, StepType};
use crate::{AppError, Result};

use super::db::Database;
use super::{fmt_ts, parse_opt_ts, parse_ts, to_u32};

/// Repository wrapper around `SQLite` for step records.
#[derive(Clone)]
pub struct StepRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    session_id: String,
    step_number: i64,
    step_type: String,
    content: String,
    reasoning: Option<String>,
    status: String,
    output: Option<String>,
    exit_code: Option<i64>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl StepRow {
    fn into_step(self) -> Result<Step> {
        let exit_code = self
            .exit_code
            .map(|code| {
                i32::try_from(code).map_err(|_| AppError::Db(format!("invalid exit_code: {code}")))
            })
            .transpose()?;

        Ok(Step {
            step_number: to_u32("step_number", self.step_number)?,
            step_type: parse_step_type(&self.step_type)?,
            status: parse_step_status(&self.status)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            started_at: parse_opt_ts("started_at", self.started_at.as_deref())?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
            id: self.id,
            session_id: self.session_id,
            content: self.content,
            reasoning: self.reasoning,
            output: self.output,
            exit_code,
        })
    }
}

fn parse_step_type(s: &str) -> Result<StepType> {
    match s {
        "command" => Ok(StepType::Command),
        "analysis" => Ok(StepType::Analysis),
        "question" => Ok(StepType::Question),
        "complete" => Ok(StepType::Complete),
        "failed" => Ok(StepType::Failed),
        other => Err(AppError::Db(format!("invalid step type: {other}"))),
    }
}

fn step_type_str(t: StepType) -> &'static str {
    match t {
        StepType::Command => "command",
        StepType::Analysis => "analysis",
        StepType::Question => "question",
        StepType::Complete => "complete",
        StepType::Failed => "failed",
    }
}

fn parse_step_status(s: &str) -> Result<StepStatus> {
    match s {
        "pending" => Ok(StepStatus::Pending),
        "approved" => Ok(StepStatus::Approved),
        "executing" => Ok(StepStatus::Executing),
        "executed" => Ok(StepStatus::Executed),
        "rejected" => Ok(StepStatus::Rejected),
        "failed" => Ok(StepStatus::Failed),
        other => Err(AppError::Db(format!("invalid step status: {other}"))),
    }
}

fn step_status_str(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Pending => "pending",
        StepStatus::Approved => "approved",
        StepStatus::Executing => "executing",
        StepStatus::Executed => "executed",
        StepStatus::Rejected => "rejected",
        StepStatus::Failed => "failed",
    }
}

impl StepRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append the next step of a session for `action`.
    ///
    /// Runs in one transaction: refuses if the session already has a pending
    /// step or has ended, increments `current_step_number` by exactly one and
    /// inserts the step under that number.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if a pending step exists or the
    /// session is terminal, `AppError::NotFound` if the session is unknown,
    /// or `AppError::Db` if persistence fails.
    pub async fn create_next(&self, session_id: &str, action: &AgentAction) -> Result<Step> {
        let mut tx = self.db.begin().await?;

        let pending: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM agent_step WHERE session_id = ?1 AND status = 'pending'",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;
        if pending.0 > 0 {
            tx.rollback().await?;
            return Err(AppError::InvalidTransition(format!(
                "session {session_id} already has a pending step"
            )));
        }

        let next: Option<(i64,)> = sqlx::query_as(
            "UPDATE agent_session
             SET current_step_number = current_step_number + 1, updated_at = ?1
             WHERE id = ?2 AND status NOT IN ('completed', 'failed', 'stopped')
             RETURNING current_step_number",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((number,)) = next else {
            tx.rollback().await?;
            return Err(AppError::InvalidTransition(format!(
                "session {session_id} is missing or has ended"
            )));
        };

        let step = Step::from_action(session_id, to_u32("step_number", number)?, action);
        sqlx::query(
            "INSERT INTO agent_step (id, session_id, step_number, step_type, content, reasoning,
             status, output, exit_code, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&step.id)
        .bind(&step.session_id)
        .bind(i64::from(step.step_number))
        .bind(step_type_str(step.step_type))
        .bind(&step.content)
        .bind(&step.reasoning)
        .bind(step_status_str(step.status))
        .bind(&step.output)
        .bind(step.exit_code)
        .bind(fmt_ts(step.created_at))
        .bind(step.started_at.map(fmt_ts))
        .bind(step.completed_at.map(fmt_ts))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(step)
    }

    /// Retrieve a step by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Step>> {
        let row: Option<StepRow> = sqlx::query_as("SELECT * FROM agent_step WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(StepRow::into_step).transpose()
    }

    /// Retrieve a step by identifier, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the step does not exist.
    pub async fn require(&self, id: &str) -> Result<Step> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("step {id} not found")))
    }

    /// All steps of a session in `step_number` order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Step>> {
        let rows: Vec<StepRow> = sqlx::query_as(
            "SELECT * FROM agent_step WHERE session_id = ?1 ORDER BY step_number ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(StepRow::into_step).collect()
    }

    /// The pending step of a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_pending(&self, session_id: &str) -> Result<Option<Step>> {
        let row: Option<StepRow> = sqlx::query_as(
            "SELECT * FROM agent_step WHERE session_id = ?1 AND status = 'pending' LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(StepRow::into_step).transpose()
    }

    /// `Pending → Approved`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not pending.
    pub async fn approve(&self, id: &str) -> Result<Step> {
        self.transition(id, StepStatus::Approved, None, None).await
    }

    /// `Pending → Rejected` with the synthetic rejection output.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not pending.
    pub async fn reject(&self, id: &str, output: &str) -> Result<Step> {
        self.transition(id, StepStatus::Rejected, Some(output), None)
            .await
    }

    /// `Approved → Executing`, stamping `started_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not approved.
    pub async fn start_execution(&self, id: &str) -> Result<Step> {
        self.transition(id, StepStatus::Executing, None, None).await
    }

    /// Record the outcome of an execution (`Executed` or `Failed`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not executing.
    pub async fn finish_execution(
        &self,
        id: &str,
        status: StepStatus,
        output: &str,
        exit_code: i32,
    ) -> Result<Step> {
        self.transition(id, status, Some(output), Some(exit_code))
            .await
    }

    /// Write an operator answer into a pending question: `Pending → Executed`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not pending.
    pub async fn answer(&self, id: &str, answer: &str) -> Result<Step> {
        self.transition(id, StepStatus::Executed, Some(answer), None)
            .await
    }

    /// Close a pending step that needs no execution (`complete`/`failed`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not pending.
    pub async fn resolve(&self, id: &str) -> Result<Step> {
        self.transition(id, StepStatus::Executed, None, None).await
    }

    /// Fail every unfinished step of a session. Returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn fail_open(&self, session_id: &str, output: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE agent_step SET status = 'failed', output = COALESCE(output, ?1),
             completed_at = ?2
             WHERE session_id = ?3 AND status IN ('pending', 'approved', 'executing')",
        )
        .bind(output)
        .bind(fmt_ts(Utc::now()))
        .bind(session_id)
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    async fn transition(
        &self,
        id: &str,
        next: StepStatus,
        output: Option<&str>,
        exit_code: Option<i32>,
    ) -> Result<Step> {
        let current = self.require(id).await?;
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "step {id}: {} -> {}",
                step_status_str(current.status),
                step_status_str(next)
            )));
        }

        let now = fmt_ts(Utc::now());
        let started_at = (next == StepStatus::Executing).then(|| now.clone());
        let completed_at = next.is_terminal().then(|| now.clone());
        let result = sqlx::query(
            "UPDATE agent_step SET status = ?1, output = COALESCE(?2, output),
             exit_code = COALESCE(?3, exit_code), started_at = COALESCE(?4, started_at),
             completed_at = COALESCE(?5, completed_at)
             WHERE id = ?6 AND status = ?7",
        )
        .bind(step_status_str(next))
        .bind(output)
        .bind(exit_code)
        .bind(&started_at)
        .bind(&completed_at)
        .bind(id)
        .bind(step_status_str(current.status))
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidTransition(format!(
                "step {id} changed status concurrently"
            )));
        }

        self.require(id).await
    }
}
