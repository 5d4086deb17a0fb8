//! Unattended execution of one background task.
//!
//! The runner drives the model toward the task goal without per-step
//! approval. Every tool call is appended to the task's iteration trace with
//! a heuristic error classification. Commands matching a high-risk pattern
//! are never executed: they go to the [`ProposalSink`] and the trace records
//! the proposal instead.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::risk::RiskPolicy;
use super::{ensure_session, finish_task, EngineDeps, RunEnd};
use crate::agent::SessionCancels;
use crate::integrations::{ChatMessage, Executor, Proposal};
use crate::models::action::AgentAction;
use crate::models::iteration::Iteration;
use crate::models::session::{Session, SessionStatus};
use crate::models::task::{Task, TaskStatus};
use crate::notify::AgentEvent;
use crate::persistence::iteration_repo::IterationRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::{AppError, Result};

/// Reply given to `question` actions; nobody is watching a background run.
pub const NO_OPERATOR_REPLY: &str = "No operator is available; decide autonomously.";

const BACKGROUND_PROMPT: &str = "You are an infrastructure remediation agent running \
unattended on a single target server. No operator is watching. Work toward the goal \
one action at a time.\n\
Reply with exactly one JSON object and nothing else:\n\
{\"action\": \"command\" | \"question\" | \"complete\" | \"failed\", \
\"content\": \"...\", \"reasoning\": \"...\"}\n\
Destructive commands are not executed; they are queued for human review.";

/// One command the agent asked to run.
struct ToolCall<'a> {
    number: u32,
    command: String,
    reasoning: &'a str,
}

/// Executes background tasks.
#[derive(Clone)]
pub struct BackgroundRunner {
    deps: EngineDeps,
    tasks: TaskRepo,
    sessions: SessionRepo,
    iterations: IterationRepo,
    risk: Arc<RiskPolicy>,
    cancels: SessionCancels,
}

impl BackgroundRunner {
    /// Build a runner.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the risk patterns do not compile.
    pub fn new(deps: EngineDeps) -> Result<Self> {
        let risk = RiskPolicy::from_config(&deps.config.risk)?;
        Ok(Self {
            tasks: TaskRepo::new(Arc::clone(&deps.db)),
            sessions: SessionRepo::new(Arc::clone(&deps.db)),
            iterations: IterationRepo::new(Arc::clone(&deps.db)),
            risk: Arc::new(risk),
            cancels: SessionCancels::default(),
            deps,
        })
    }

    /// Register running sessions in `cancels`, so stopping a task's session
    /// through the agent service also stops the run.
    #[must_use]
    pub fn with_session_cancels(mut self, cancels: SessionCancels) -> Self {
        self.cancels = cancels;
        self
    }

    /// Run `task_id` to a terminal state.
    ///
    /// Idempotent: a task that already finished is returned unchanged, and a
    /// task that already has iterations continues the same trace. Only
    /// launched (`running`) tasks are run; queued tasks start through the
    /// scheduler, which owns pool capacity. Failures are written to the task
    /// rather than returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown task,
    /// `AppError::InvalidTransition` for a queued or paused task, or
    /// `AppError::Db` if the outcome cannot be written.
    pub async fn run(&self, task_id: &str, cancel: CancellationToken) -> Result<Task> {
        let span = info_span!("background_run", task_id);
        async {
            let task = self.tasks.require(task_id).await?;
            if task.status.is_terminal() {
                info!("task already finished");
                return Ok(task);
            }
            if task.status != TaskStatus::Running {
                return Err(AppError::InvalidTransition(format!(
                    "task {task_id} is {:?}; launch it through the scheduler",
                    task.status
                )));
            }

            let session = ensure_session(&self.deps.db, &task).await?;
            self.cancels.register(&session.id, cancel.clone()).await;
            let result = self.drive(&task, &session, &cancel).await;
            self.cancels.release(&session.id).await;

            let end = match result {
                Ok(end) => end,
                Err(err) => {
                    warn!(%err, "background run aborted");
                    RunEnd::from_error(&err)
                }
            };
            finish_task(&self.deps.db, &self.deps.notifier, task_id, end).await?;
            self.tasks.require(task_id).await
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        task: &Task,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<RunEnd> {
        let provider = self.deps.providers.require(None)?;
        let executor = cancellable(
            cancel,
            self.deps.executors.connect(task.target_server_id.as_deref()),
        )
        .await?;

        if matches!(session.status, SessionStatus::Idle | SessionStatus::Analyzing) {
            self.sessions
                .update_status(&session.id, SessionStatus::Thinking)
                .await?;
            self.deps.notifier.emit(&AgentEvent::StatusChanged {
                session_id: session.id.clone(),
                status: SessionStatus::Thinking,
            });
        }

        let history = self.iterations.list_for_task(&task.id).await?;
        let mut conversation = vec![ChatMessage::user(format!("Goal: {}", task.goal))];
        for iteration in &history {
            conversation.push(ChatMessage::assistant(command_json(&iteration.command, "")));
            conversation.push(ChatMessage::user(describe(iteration)));
        }

        let budget = task.iteration_budget();
        let mut recorded = u32::try_from(history.len())
            .map_err(|_| AppError::Db("iteration count overflow".into()))?;
        // One extra turn lets the agent report after spending its budget.
        let mut turns_left = budget.saturating_sub(recorded) + 1;

        while turns_left > 0 {
            turns_left -= 1;
            if self.session_ended(&session.id).await? {
                return Ok(RunEnd::Cancelled);
            }
            let reply = cancellable(
                cancel,
                provider.complete(BACKGROUND_PROMPT, &conversation),
            )
            .await?;
            // The session may have been stopped while the model was thinking.
            if self.session_ended(&session.id).await? {
                return Ok(RunEnd::Cancelled);
            }
            let action = AgentAction::parse(&reply)?;

            match action {
                AgentAction::Command { content, reasoning } => {
                    if recorded >= budget {
                        break;
                    }
                    recorded += 1;
                    let call = ToolCall {
                        number: recorded,
                        command: content,
                        reasoning: &reasoning,
                    };
                    let iteration = self
                        .tool_call(task, session, executor.as_ref(), call, cancel)
                        .await?;
                    conversation.push(ChatMessage::assistant(command_json(
                        &iteration.command,
                        &reasoning,
                    )));
                    conversation.push(ChatMessage::user(describe(&iteration)));
                }
                AgentAction::Question { content, reasoning } => {
                    info!(question = %content, "answering question autonomously");
                    conversation.push(ChatMessage::assistant(
                        json!({ "action": "question", "content": content, "reasoning": reasoning })
                            .to_string(),
                    ));
                    conversation.push(ChatMessage::user(NO_OPERATOR_REPLY));
                }
                AgentAction::Complete { content, .. } => return Ok(RunEnd::Completed(content)),
                AgentAction::Failed { content, .. } => return Ok(RunEnd::Failed(content)),
            }
        }

        Ok(RunEnd::Failed(format!(
            "agent reached maximum iteration limit ({budget} iterations) without completing"
        )))
    }

    async fn session_ended(&self, session_id: &str) -> Result<bool> {
        let ended = self.sessions.require(session_id).await?.status.is_terminal();
        if ended {
            info!(session_id, "session ended outside the runner");
        }
        Ok(ended)
    }

    async fn tool_call(
        &self,
        task: &Task,
        session: &Session,
        executor: &dyn Executor,
        call: ToolCall<'_>,
        cancel: &CancellationToken,
    ) -> Result<Iteration> {
        let ToolCall {
            number,
            command,
            reasoning,
        } = call;
        let verdict = self.risk.check(&command);
        let (output, exit_code) = if let Some(pattern) = verdict.matched_pattern {
            let proposal = Proposal {
                task_id: task.id.clone(),
                session_id: session.id.clone(),
                target_server_id: task.target_server_id.clone(),
                command: command.clone(),
                reasoning: reasoning.to_owned(),
                matched_pattern: pattern,
            };
            self.deps.proposals.propose(&proposal).await?;
            (format!("[PROPOSED FOR APPROVAL: {command}]"), None)
        } else {
            let seconds = self.deps.config.timeouts.command_seconds;
            let result = cancellable(cancel, async {
                match tokio::time::timeout(
                    self.deps.config.command_timeout(),
                    executor.execute(&command, seconds),
                )
                .await
                {
                    Ok(result) => Ok(result),
                    Err(_) => Ok(Err(AppError::Timeout(format!(
                        "command did not finish within {seconds} seconds"
                    )))),
                }
            })
            .await?;
            match result {
                Ok(out) => (out.merged_output(), Some(out.resolved_exit_code())),
                Err(err) => (err.marker(), Some(-1)),
            }
        };

        let iteration = Iteration::record(&task.id, number, command, output, exit_code);
        self.iterations.append(&iteration).await?;
        info!(
            iteration = number,
            exit_code = ?iteration.exit_code,
            error_type = ?iteration.error_type,
            "iteration recorded"
        );
        self.deps.notifier.emit(&AgentEvent::IterationRecorded {
            iteration: iteration.clone(),
        });
        Ok(iteration)
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AppError::Cancelled("task stopped".into())),
        res = fut => res,
    }
}

fn command_json(command: &str, reasoning: &str) -> String {
    json!({ "action": "command", "content": command, "reasoning": reasoning }).to_string()
}

fn describe(iteration: &Iteration) -> String {
    let exit_code = iteration
        .exit_code
        .map_or_else(|| "not executed".to_owned(), |code| code.to_string());
    let mut text = format!(
        "Iteration {} exit code: {exit_code}\nOutput:\n{}",
        iteration.iteration_number, iteration.output
    );
    if let Some(kind) = iteration.error_type {
        text.push_str(&format!("\nDetected error: {}", kind.as_str()));
    }
    text
}
