//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Caller or collaborator supplied an unusable value (missing
    /// provider, zero-sized pool).
    Validation(String),
    /// LLM reply could not be decoded into an agent action.
    Parse(String),
    /// LLM provider call failed.
    Llm(String),
    /// Remote executor could not be reached or failed at transport level.
    Executor(String),
    /// Command ran but failed; recoverable at step level.
    Execution(String),
    /// Command exceeded its execution timeout.
    Timeout(String),
    /// Work was cancelled by an explicit stop request.
    Cancelled(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Lifecycle transition not permitted by the state machine.
    InvalidTransition(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Short type name used in the `[ERROR: <Type>: <message>]` step marker.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Db(_) => "DatabaseError",
            Self::Validation(_) => "ValidationError",
            Self::Parse(_) => "ParseError",
            Self::Llm(_) => "LlmError",
            Self::Executor(_) => "ExecutorError",
            Self::Execution(_) => "ExecutionError",
            Self::Timeout(_) => "TimeoutError",
            Self::Cancelled(_) => "CancellationError",
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidTransition(_) => "TransitionError",
            Self::Io(_) => "IoError",
        }
    }

    /// The bare message without the display prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Db(msg)
            | Self::Validation(msg)
            | Self::Parse(msg)
            | Self::Llm(msg)
            | Self::Executor(msg)
            | Self::Execution(msg)
            | Self::Timeout(msg)
            | Self::Cancelled(msg)
            | Self::NotFound(msg)
            | Self::InvalidTransition(msg)
            | Self::Io(msg) => msg,
        }
    }

    /// Inline marker recorded in step output when an execution error is
    /// captured instead of propagated: `[ERROR: <Type>: <message>]`.
    #[must_use]
    pub fn marker(&self) -> String {
        format!("[ERROR: {}: {}]", self.kind(), self.message())
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Llm(msg) => write!(f, "llm: {msg}"),
            Self::Executor(msg) => write!(f, "executor: {msg}"),
            Self::Execution(msg) => write!(f, "execution: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
