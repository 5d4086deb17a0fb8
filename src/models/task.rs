//! Agent task model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a task's session is driven.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Step loop with operator approval gating.
    Interactive,
    /// Autonomous run without per-step approval.
    Background,
}

/// Lifecycle status for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a free pool slot.
    Queued,
    /// Holding a pool slot.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully, cancelled or orphaned.
    Failed,
    /// Held back from scheduling by an operator.
    Paused,
}

impl TaskStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One agent work item inside a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Unique record identifier.
    pub id: String,
    /// Owning pool.
    pub pool_id: String,
    /// Session driving the task; set at launch.
    pub agent_session_id: Option<String>,
    /// What the agent is trying to achieve.
    pub goal: String,
    /// Interactive or background.
    pub kind: TaskKind,
    /// Higher runs first.
    pub priority: i32,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Keep iterating until the agent finishes or the budget runs out.
    pub auto_iterate: bool,
    /// Iteration (or step) budget.
    pub max_iterations: u32,
    /// Server the agent operates on.
    pub target_server_id: Option<String>,
    /// Failure text when `status == Failed`.
    pub error_message: Option<String>,
    /// Creation timestamp; FIFO tiebreak among equal priorities.
    pub created_at: DateTime<Utc>,
    /// When the task was launched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for `spawn_agent`.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Agent goal.
    pub goal: String,
    /// Interactive or background.
    pub kind: TaskKind,
    /// Higher runs first.
    pub priority: i32,
    /// Keep iterating until done.
    pub auto_iterate: bool,
    /// Budget; `None` uses the configured default.
    pub max_iterations: Option<u32>,
    /// Server the agent operates on.
    pub target_server_id: Option<String>,
}

impl SpawnRequest {
    /// Background request with default priority and budget.
    #[must_use]
    pub fn background(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            kind: TaskKind::Background,
            priority: 0,
            auto_iterate: true,
            max_iterations: None,
            target_server_id: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Task {
    /// Construct a queued task from a spawn request.
    #[must_use]
    pub fn new(pool_id: String, request: SpawnRequest, default_max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pool_id,
            agent_session_id: None,
            goal: request.goal,
            kind: request.kind,
            priority: request.priority,
            status: TaskStatus::Queued,
            auto_iterate: request.auto_iterate,
            max_iterations: request.max_iterations.unwrap_or(default_max_iterations),
            target_server_id: request.target_server_id,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Iterations the background runner may spend on this task.
    #[must_use]
    pub fn iteration_budget(&self) -> u32 {
        if self.auto_iterate {
            self.max_iterations
        } else {
            1
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self.status, next),
            (TaskStatus::Queued, TaskStatus::Running | TaskStatus::Paused)
                | (TaskStatus::Paused, TaskStatus::Queued)
                | (TaskStatus::Running, TaskStatus::Completed | TaskStatus::Failed)
        )
    }
}
