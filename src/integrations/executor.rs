//! Remote command execution interface.
//!
//! Transports (SSH, `WinRM`, agent APIs) live outside the engine; they only
//! have to run one command and report its streams and exit status.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::BoxFuture;
use crate::Result;

/// Result of running one command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status, when the transport reports one.
    pub exit_code: Option<i32>,
    /// Transport-level success flag, used when `exit_code` is absent.
    pub success: bool,
}

impl ExecOutput {
    /// Successful run with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Exit code, falling back to `0`/`1` from the success flag.
    #[must_use]
    pub fn resolved_exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(i32::from(!self.success))
    }

    /// Stdout with a trailing `[STDERR]: …` block when stderr is non-empty.
    #[must_use]
    pub fn merged_output(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            format!("[STDERR]: {stderr}")
        } else {
            format!("{}\n[STDERR]: {stderr}", self.stdout.trim_end())
        }
    }
}

/// Runs commands on one target.
pub trait Executor: Send + Sync {
    /// Run `command`, giving up after `timeout_seconds`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails; a command that runs and
    /// exits non-zero is an `Ok` with that exit code.
    fn execute<'a>(&'a self, command: &'a str, timeout_seconds: u64)
        -> BoxFuture<'a, Result<ExecOutput>>;
}

/// Produces an executor for a target server.
pub trait ExecutorResolver: Send + Sync {
    /// Connect to `target_server_id` (or the default target when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`](crate::AppError::Executor) if the target
    /// cannot be reached; this fails the enclosing task or session.
    fn connect<'a>(
        &'a self,
        target_server_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Arc<dyn Executor>>>;
}

/// Resolver that hands out the same executor for every target.
#[derive(Clone)]
pub struct SharedExecutor(pub Arc<dyn Executor>);

impl ExecutorResolver for SharedExecutor {
    fn connect<'a>(
        &'a self,
        _target_server_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Arc<dyn Executor>>> {
        let executor = Arc::clone(&self.0);
        Box::pin(async move { Ok(executor) })
    }
}
