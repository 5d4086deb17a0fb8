//! Background task iteration audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Heuristic classification of a failed tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorType {
    /// Output mentions "permission denied".
    PermissionDenied,
    /// Output mentions "not found" or "no such file".
    FileNotFound,
    /// Output mentions "syntax error".
    SyntaxError,
    /// Output mentions "timeout".
    Timeout,
    /// Anything else that failed.
    RuntimeError,
}

impl ErrorType {
    /// Stored name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "PermissionDenied",
            Self::FileNotFound => "FileNotFound",
            Self::SyntaxError => "SyntaxError",
            Self::Timeout => "Timeout",
            Self::RuntimeError => "RuntimeError",
        }
    }

    /// Parse a stored name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PermissionDenied" => Some(Self::PermissionDenied),
            "FileNotFound" => Some(Self::FileNotFound),
            "SyntaxError" => Some(Self::SyntaxError),
            "Timeout" => Some(Self::Timeout),
            "RuntimeError" => Some(Self::RuntimeError),
            _ => None,
        }
    }
}

/// Classify a tool call outcome.
///
/// A non-zero exit code is always an error; otherwise the output is scanned
/// for well-known failure phrases. Returns `None` when nothing looks wrong
/// or the command never ran (`exit_code` absent).
#[must_use]
pub fn classify_error(exit_code: Option<i32>, output: &str) -> Option<ErrorType> {
    let exit_code = exit_code?;
    let lowered = output.to_lowercase();
    let matched = if lowered.contains("permission denied") {
        Some(ErrorType::PermissionDenied)
    } else if lowered.contains("not found") || lowered.contains("no such file") {
        Some(ErrorType::FileNotFound)
    } else if lowered.contains("syntax error") {
        Some(ErrorType::SyntaxError)
    } else if lowered.contains("timeout") {
        Some(ErrorType::Timeout)
    } else {
        None
    };

    if exit_code == 0 {
        matched
    } else {
        Some(matched.unwrap_or(ErrorType::RuntimeError))
    }
}

/// One recorded command/output pair in a background task's trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Iteration {
    /// Owning task.
    pub agent_task_id: String,
    /// 1-based position in the trace.
    pub iteration_number: u32,
    /// Command the agent issued.
    pub command: String,
    /// Captured output.
    pub output: String,
    /// Exit code, absent when the command was not executed.
    pub exit_code: Option<i32>,
    /// Whether the call looked like a failure.
    pub error_detected: bool,
    /// Failure classification.
    pub error_type: Option<ErrorType>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Iteration {
    /// Build an iteration record, classifying the outcome.
    #[must_use]
    pub fn record(
        agent_task_id: &str,
        iteration_number: u32,
        command: String,
        output: String,
        exit_code: Option<i32>,
    ) -> Self {
        let error_type = classify_error(exit_code, &output);
        Self {
            agent_task_id: agent_task_id.to_owned(),
            iteration_number,
            command,
            output,
            exit_code,
            error_detected: error_type.is_some(),
            error_type,
            created_at: Utc::now(),
        }
    }
}
