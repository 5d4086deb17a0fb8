//! Agent session model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an agent session.
///
/// `Idle → Thinking → {AwaitingApproval | Executing} → Analyzing → Thinking → …`
/// until one of the terminal states is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, loop not yet started.
    Idle,
    /// Waiting on the LLM for the next action.
    Thinking,
    /// Waiting on an operator decision or answer.
    AwaitingApproval,
    /// A command is running on the target.
    Executing,
    /// Command output recorded; next round pending.
    Analyzing,
    /// Goal reached.
    Completed,
    /// Agent declared failure or an unrecoverable error occurred.
    Failed,
    /// Stopped by an explicit request.
    Stopped,
}

impl SessionStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Parent chat/transcript this session reports to.
    pub chat_id: Option<String>,
    /// Pool the session was launched for, if any.
    pub pool_id: Option<String>,
    /// Operator who owns the session.
    pub user_id: String,
    /// Server the agent operates on.
    pub target_server_id: Option<String>,
    /// What the agent is trying to achieve.
    pub goal: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Execute commands without operator approval.
    pub auto_approve: bool,
    /// Step budget.
    pub max_steps: u32,
    /// Number of the most recently created step (0 before the first).
    pub current_step_number: u32,
    /// Failure text when `status == Failed`.
    pub error_message: Option<String>,
    /// Completion summary when `status == Completed`.
    pub summary: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// When the session reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    /// Parent chat/transcript.
    pub chat_id: Option<String>,
    /// Owning pool.
    pub pool_id: Option<String>,
    /// Operator.
    pub user_id: String,
    /// Target server.
    pub target_server_id: Option<String>,
    /// Agent goal.
    pub goal: String,
    /// Skip approval gating.
    pub auto_approve: bool,
    /// Step budget; `None` uses the configured default.
    pub max_steps: Option<u32>,
}

impl Session {
    /// Construct a new idle session with a generated identifier.
    #[must_use]
    pub fn new(params: NewSession, default_max_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: params.chat_id,
            pool_id: params.pool_id,
            user_id: params.user_id,
            target_server_id: params.target_server_id,
            goal: params.goal,
            status: SessionStatus::Idle,
            auto_approve: params.auto_approve,
            max_steps: params.max_steps.unwrap_or(default_max_steps),
            current_step_number: 0,
            error_message: None,
            summary: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Failed` and `Stopped` are reachable from every non-terminal status.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        matches!(
            (self.status, next),
            (_, SessionStatus::Failed | SessionStatus::Stopped)
                | (
                    SessionStatus::Idle | SessionStatus::Analyzing,
                    SessionStatus::Thinking
                )
                | (
                    SessionStatus::Thinking,
                    SessionStatus::AwaitingApproval
                        | SessionStatus::Executing
                        | SessionStatus::Analyzing
                        | SessionStatus::Completed
                )
                | (
                    SessionStatus::AwaitingApproval,
                    SessionStatus::Executing | SessionStatus::Analyzing
                )
                | (SessionStatus::Executing, SessionStatus::Analyzing)
        )
    }
}
