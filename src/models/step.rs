//! Session step model and step state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::AgentAction;

/// Output recorded on a command step rejected by the operator.
pub const REJECTED_OUTPUT: &str = "[User rejected this command]";

/// Kind of action a step represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Shell command to run on the target.
    Command,
    /// Free-form analysis note.
    Analysis,
    /// Question addressed to the operator.
    Question,
    /// Agent declared the goal reached.
    Complete,
    /// Agent declared the goal unreachable.
    Failed,
}

/// Lifecycle status for a step.
///
/// `Pending → {Approved → Executing → Executed} | Rejected | Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Awaiting a decision or answer.
    Pending,
    /// Operator (or auto-approve) cleared the command.
    Approved,
    /// Command is running.
    Executing,
    /// Finished; output recorded.
    Executed,
    /// Operator declined the command.
    Rejected,
    /// Execution raised an error.
    Failed,
}

impl StepStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Rejected | Self::Failed)
    }
}

/// One proposed or executed action within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Step {
    /// Unique record identifier.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// 1-based, gapless position within the session.
    pub step_number: u32,
    /// Kind of action.
    pub step_type: StepType,
    /// Command text, question, summary or failure reason.
    pub content: String,
    /// Agent's stated reasoning.
    pub reasoning: Option<String>,
    /// Current lifecycle status.
    pub status: StepStatus,
    /// Captured output or operator answer.
    pub output: Option<String>,
    /// Command exit code; `-1` when the executor raised.
    pub exit_code: Option<i32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Build a pending step for `action` at position `step_number`.
    #[must_use]
    pub fn from_action(session_id: &str, step_number: u32, action: &AgentAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            step_number,
            step_type: action.step_type(),
            content: action.content().to_owned(),
            reasoning: Some(action.reasoning().to_owned()),
            status: StepStatus::Pending,
            output: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self.status, next),
            (
                StepStatus::Pending,
                StepStatus::Approved
                    | StepStatus::Rejected
                    | StepStatus::Failed
                    | StepStatus::Executed
            ) | (
                StepStatus::Approved,
                StepStatus::Executing | StepStatus::Failed
            ) | (
                StepStatus::Executing,
                StepStatus::Executed | StepStatus::Failed
            )
        )
    }
}
