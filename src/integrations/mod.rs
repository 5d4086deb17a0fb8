//! Interfaces to the collaborators the engine consumes but does not own.
//!
//! The LLM client, the remote execution transport, knowledge search,
//! operational context (targets and alerts) and the high-risk proposal
//! queue all live outside the engine. Each is a trait object so hosts can
//! plug in real transports and tests can plug in stubs.

pub mod context;
pub mod executor;
pub mod llm;
pub mod proposals;

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future returned by collaborator trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use context::{KnowledgeSearch, NoContext, OpsContext};
pub use executor::{ExecOutput, Executor, ExecutorResolver, SharedExecutor};
pub use llm::{ChatMessage, ChatRole, LlmProvider, ProviderRegistry};
pub use proposals::{LogProposals, Proposal, ProposalSink};
