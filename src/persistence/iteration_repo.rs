//! Background iteration audit log repository.
//!
//! Append-only: there is no update or delete path besides the cascade from
//! the owning task.

use std::sync::Arc;

use crate::models::iteration::{ErrorType, Iteration};
use crate::{AppError, Result};

use super::db::Database;
use super::{fmt_ts, parse_ts, to_u32};

/// Repository wrapper around `SQLite` for iteration records.
#[derive(Clone)]
pub struct IterationRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct IterationRow {
    agent_task_id: String,
    iteration_number: i64,
    command: String,
    output: String,
    exit_code: Option<i64>,
    error_detected: bool,
    error_type: Option<String>,
    created_at: String,
}

impl IterationRow {
    fn into_iteration(self) -> Result<Iteration> {
        let error_type = self
            .error_type
            .as_deref()
            .map(|name| {
                ErrorType::from_name(name)
                    .ok_or_else(|| AppError::Db(format!("invalid error_type: {name}")))
            })
            .transpose()?;
        let exit_code = self
            .exit_code
            .map(|code| {
                i32::try_from(code).map_err(|_| AppError::Db(format!("invalid exit_code: {code}")))
            })
            .transpose()?;

        Ok(Iteration {
            iteration_number: to_u32("iteration_number", self.iteration_number)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            agent_task_id: self.agent_task_id,
            command: self.command,
            output: self.output,
            exit_code,
            error_detected: self.error_detected,
            error_type,
        })
    }
}

impl IterationRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append an iteration record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails, including a duplicate
    /// iteration number for the task.
    pub async fn append(&self, iteration: &Iteration) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_iteration (agent_task_id, iteration_number, command, output,
             exit_code, error_detected, error_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&iteration.agent_task_id)
        .bind(i64::from(iteration.iteration_number))
        .bind(&iteration.command)
        .bind(&iteration.output)
        .bind(iteration.exit_code)
        .bind(iteration.error_detected)
        .bind(iteration.error_type.map(ErrorType::as_str))
        .bind(fmt_ts(iteration.created_at))
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// All iterations of a task in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_task(&self, task_id: &str) -> Result<Vec<Iteration>> {
        let rows: Vec<IterationRow> = sqlx::query_as(
            "SELECT * FROM agent_iteration WHERE agent_task_id = ?1
             ORDER BY iteration_number ASC",
        )
        .bind(task_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(IterationRow::into_iteration).collect()
    }
}
