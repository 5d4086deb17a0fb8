//! Hand-off for high-risk commands that background agents may not run.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::BoxFuture;
use crate::Result;

/// A command a background agent wanted to run but must not run unattended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    /// Task that proposed it.
    pub task_id: String,
    /// Session driving the task.
    pub session_id: String,
    /// Target server, if known.
    pub target_server_id: Option<String>,
    /// Proposed command.
    pub command: String,
    /// Agent's reasoning.
    pub reasoning: String,
    /// Risk pattern that matched.
    pub matched_pattern: String,
}

/// Receives high-risk proposals for human review.
pub trait ProposalSink: Send + Sync {
    /// Queue `proposal` for review.
    ///
    /// # Errors
    ///
    /// Returns an error if the proposal cannot be recorded.
    fn propose<'a>(&'a self, proposal: &'a Proposal) -> BoxFuture<'a, Result<()>>;
}

/// Sink that only logs proposals.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProposals;

impl ProposalSink for LogProposals {
    fn propose<'a>(&'a self, proposal: &'a Proposal) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            warn!(
                task_id = %proposal.task_id,
                command = %proposal.command,
                pattern = %proposal.matched_pattern,
                "high-risk command proposed for review"
            );
            Ok(())
        })
    }
}
