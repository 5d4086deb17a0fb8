//! Pool scheduling and background execution.
//!
//! The [`Scheduler`](scheduler::Scheduler) admits tasks into pools under a
//! concurrency cap and launches each one either through the interactive
//! agent loop or through the [`BackgroundRunner`](runner::BackgroundRunner).
//! Both paths end in [`finish_task`], which writes the task, its session and
//! the parent transcript message together.

pub mod risk;
pub mod runner;
pub mod scheduler;

use std::sync::Arc;

use tracing::{info, warn};

use crate::integrations::{ExecutorResolver, ProposalSink, ProviderRegistry};
use crate::models::session::{NewSession, Session, SessionStatus};
use crate::models::task::{Task, TaskKind, TaskStatus};
use crate::models::transcript::TranscriptMessage;
use crate::notify::{AgentEvent, Notifier};
use crate::persistence::db::Database;
use crate::persistence::pool_repo::PoolRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::task_repo::{TaskOutcome, TaskRepo};
use crate::{AppError, GlobalConfig, Result};

/// Collaborators shared by the scheduler and the runners it launches.
#[derive(Clone)]
pub struct EngineDeps {
    /// Shared database handle.
    pub db: Arc<Database>,
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Observer sink for status events.
    pub notifier: Notifier,
    /// LLM providers; the default one drives every task.
    pub providers: Arc<ProviderRegistry>,
    /// Remote execution transport.
    pub executors: Arc<dyn ExecutorResolver>,
    /// Review queue for high-risk background commands.
    pub proposals: Arc<dyn ProposalSink>,
}

/// How a task run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// Goal reached, with the agent's summary.
    Completed(String),
    /// Run failed with the given message.
    Failed(String),
    /// Run was cancelled.
    Cancelled,
}

impl RunEnd {
    /// Map an error that aborted a run.
    #[must_use]
    pub fn from_error(err: &AppError) -> Self {
        match err {
            AppError::Cancelled(_) => Self::Cancelled,
            other => Self::Failed(other.to_string()),
        }
    }

    /// Map the terminal state of an interactive session.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        match session.status {
            SessionStatus::Completed => Self::Completed(session.summary.clone().unwrap_or_default()),
            SessionStatus::Stopped => Self::Cancelled,
            _ => Self::Failed(
                session
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "session failed".into()),
            ),
        }
    }

    fn into_outcome(self, task: &Task, chat_id: Option<&str>) -> TaskOutcome {
        let label = match task.kind {
            TaskKind::Interactive => "Agent task",
            TaskKind::Background => "Background task",
        };
        let (task_status, session_status, summary, error_message, text) = match self {
            Self::Completed(summary) => (
                TaskStatus::Completed,
                SessionStatus::Completed,
                Some(summary.clone()),
                None,
                format!("{label} completed: {}\n\n{summary}", task.goal),
            ),
            Self::Failed(message) => (
                TaskStatus::Failed,
                SessionStatus::Failed,
                None,
                Some(message.clone()),
                format!("{label} failed: {}\n\n{message}", task.goal),
            ),
            Self::Cancelled => (
                TaskStatus::Failed,
                SessionStatus::Stopped,
                None,
                Some("cancelled".to_owned()),
                format!("{label} cancelled: {}", task.goal),
            ),
        };

        TaskOutcome {
            task_status,
            session_status,
            summary,
            error_message,
            transcript: chat_id.map(|chat| TranscriptMessage::assistant(chat, text)),
        }
    }
}

/// Make sure `task` has a session, creating one scoped to its pool.
///
/// Background sessions auto-approve; interactive ones wait for operators.
/// The session budget is the task's `max_iterations`.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the pool is gone, or `AppError::Db`.
pub async fn ensure_session(db: &Arc<Database>, task: &Task) -> Result<Session> {
    let sessions = SessionRepo::new(Arc::clone(db));
    if let Some(ref id) = task.agent_session_id {
        return sessions.require(id).await;
    }

    let pool = PoolRepo::new(Arc::clone(db))
        .get_by_id(&task.pool_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("pool {} not found", task.pool_id)))?;

    let params = NewSession {
        chat_id: Some(pool.owner_id.clone()),
        pool_id: Some(pool.id.clone()),
        user_id: pool.owner_id,
        target_server_id: task.target_server_id.clone(),
        goal: task.goal.clone(),
        auto_approve: task.kind == TaskKind::Background,
        max_steps: Some(task.max_iterations),
    };
    let session = sessions.create(&Session::new(params, task.max_iterations)).await?;
    TaskRepo::new(Arc::clone(db))
        .set_session(&task.id, &session.id)
        .await?;
    info!(task_id = %task.id, session_id = %session.id, "created session for task");
    Ok(session)
}

/// Write the terminal outcome of a running task.
///
/// Returns `false` if the task had already finished.
///
/// # Errors
///
/// Returns `AppError::Db` if the transaction fails.
pub async fn finish_task(
    db: &Arc<Database>,
    notifier: &Notifier,
    task_id: &str,
    end: RunEnd,
) -> Result<bool> {
    let tasks = TaskRepo::new(Arc::clone(db));
    let sessions = SessionRepo::new(Arc::clone(db));

    let task = tasks.require(task_id).await?;
    let session = match task.agent_session_id {
        Some(ref id) => sessions.get_by_id(id).await?,
        None => None,
    };
    let chat_id = session.as_ref().and_then(|s| s.chat_id.as_deref());

    let outcome = end.into_outcome(&task, chat_id);
    let applied = tasks.finish(task_id, &outcome).await?;
    if !applied {
        warn!(task_id, "task already finished, outcome discarded");
        return Ok(false);
    }

    info!(task_id, status = ?outcome.task_status, "task finished");
    notifier.emit(&AgentEvent::TaskStatusChanged {
        task_id: task.id.clone(),
        pool_id: task.pool_id.clone(),
        status: outcome.task_status,
    });
    // Interactive loops announce their own completion.
    if let (TaskKind::Background, Some(session)) = (task.kind, session) {
        let session = sessions.require(&session.id).await?;
        notifier.emit(&AgentEvent::Complete {
            session_id: session.id.clone(),
            status: session.status,
            summary: session.summary,
            error_message: session.error_message,
        });
    }
    Ok(true)
}
