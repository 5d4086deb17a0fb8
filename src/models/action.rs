//! Agent action decoded from an LLM reply.
//!
//! The model must answer with a single JSON object
//! `{"action": "...", "content": "...", "reasoning": "..."}`. Decoding is
//! strict: a missing field, an unknown action or malformed JSON is an
//! [`AppError::Parse`] and is never retried or patched up.

use serde::{Deserialize, Serialize};

use super::step::StepType;
use crate::{AppError, Result};

/// Next action proposed by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AgentAction {
    /// Run a shell command on the target.
    Command {
        /// Command line.
        content: String,
        /// Why this command.
        reasoning: String,
    },
    /// Ask the operator something.
    Question {
        /// Question text.
        content: String,
        /// Why the agent needs to know.
        reasoning: String,
    },
    /// Goal reached.
    Complete {
        /// Summary of what was done.
        content: String,
        /// Supporting evidence.
        reasoning: String,
    },
    /// Goal cannot be reached.
    Failed {
        /// Failure description.
        content: String,
        /// Supporting evidence.
        reasoning: String,
    },
}

impl AgentAction {
    /// Decode an LLM reply, stripping an optional Markdown code fence.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Parse` if the reply is not a valid action object.
    pub fn parse(reply: &str) -> Result<Self> {
        let body = strip_code_fence(reply);
        if body.is_empty() {
            return Err(AppError::Parse("empty LLM reply".into()));
        }
        serde_json::from_str(body)
            .map_err(|err| AppError::Parse(format!("invalid agent action: {err}")))
    }

    /// Step type recorded for this action.
    #[must_use]
    pub fn step_type(&self) -> StepType {
        match self {
            Self::Command { .. } => StepType::Command,
            Self::Question { .. } => StepType::Question,
            Self::Complete { .. } => StepType::Complete,
            Self::Failed { .. } => StepType::Failed,
        }
    }

    /// Action payload.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Command { content, .. }
            | Self::Question { content, .. }
            | Self::Complete { content, .. }
            | Self::Failed { content, .. } => content,
        }
    }

    /// Agent's reasoning.
    #[must_use]
    pub fn reasoning(&self) -> &str {
        match self {
            Self::Command { reasoning, .. }
            | Self::Question { reasoning, .. }
            | Self::Complete { reasoning, .. }
            | Self::Failed { reasoning, .. } => reasoning,
        }
    }

    /// Wire name of the action.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Question { .. } => "question",
            Self::Complete { .. } => "complete",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Remove a surrounding ```` ``` ```` or ```` ```json ```` fence, if present.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}
