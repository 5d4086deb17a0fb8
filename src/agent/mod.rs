//! Interactive agent service.
//!
//! Drives one session through repeated rounds of context assembly, a single
//! LLM call, step creation and dispatch until the agent completes, declares
//! failure, exhausts its step budget or is stopped.
//!
//! Approval and answer waits suspend on `oneshot` channels registered per
//! step id; operator calls ([`AgentService::approve_step`],
//! [`AgentService::reject_step`], [`AgentService::answer_question`]) write
//! the decision to the database first and then wake the waiting loop. Stop
//! requests cancel the per-session [`CancellationToken`].

pub mod context;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::integrations::{Executor, KnowledgeSearch, LlmProvider, NoContext, OpsContext};
use crate::models::action::AgentAction;
use crate::models::session::{NewSession, Session, SessionStatus};
use crate::models::step::{Step, StepStatus, StepType, REJECTED_OUTPUT};
use crate::notify::{AgentEvent, Notifier};
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::step_repo::StepRepo;
use crate::{AppError, Result};

use self::context::{build_conversation, PromptContext, SYSTEM_PROMPT};

/// Operator decision delivered to a suspended loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    /// Command approved.
    Approved,
    /// Command rejected.
    Rejected,
    /// Question answered.
    Answered,
}

/// Pending decision senders keyed by step id.
pub type PendingDecisions = Arc<Mutex<HashMap<String, oneshot::Sender<StepDecision>>>>;

/// Cancellation tokens of work driving a session, keyed by session id.
///
/// Shared between the interactive loop and the background runner so that
/// [`AgentService::stop_session`] reaches whichever one owns the session.
#[derive(Clone, Default)]
pub struct SessionCancels(Arc<Mutex<HashMap<String, CancellationToken>>>);

impl SessionCancels {
    /// Register the token of the work now driving `session_id`.
    pub async fn register(&self, session_id: &str, token: CancellationToken) {
        self.0.lock().await.insert(session_id.to_owned(), token);
    }

    /// Forget the token of `session_id` once its work has ended.
    pub async fn release(&self, session_id: &str) {
        self.0.lock().await.remove(session_id);
    }

    /// Cancel the work driving `session_id`. Returns `false` if none is registered.
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.0.lock().await.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn stopped() -> AppError {
    AppError::Cancelled("session stopped".into())
}

/// Race `fut` against `cancel`.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(stopped()),
        res = fut => res,
    }
}

/// Wait for a decision, optionally bounded by `limit`.
async fn wait_decision(
    rx: oneshot::Receiver<StepDecision>,
    limit: Option<Duration>,
) -> Result<StepDecision> {
    let closed =
        |_: oneshot::error::RecvError| AppError::Cancelled("decision channel closed".into());
    match limit {
        Some(limit) => tokio::time::timeout(limit, rx)
            .await
            .map_err(|_| {
                AppError::Timeout(format!("no answer within {} seconds", limit.as_secs()))
            })?
            .map_err(closed),
        None => rx.await.map_err(closed),
    }
}

/// Session-driving service shared by the API surface and the scheduler.
#[derive(Clone)]
pub struct AgentService {
    sessions: SessionRepo,
    steps: StepRepo,
    config: Arc<GlobalConfig>,
    notifier: Notifier,
    ops: Arc<dyn OpsContext>,
    knowledge: Arc<dyn KnowledgeSearch>,
    pending: PendingDecisions,
    tokens: SessionCancels,
}

impl AgentService {
    /// Service with no operational context sources.
    #[must_use]
    pub fn new(db: Arc<Database>, config: Arc<GlobalConfig>, notifier: Notifier) -> Self {
        Self {
            sessions: SessionRepo::new(Arc::clone(&db)),
            steps: StepRepo::new(db),
            config,
            notifier,
            ops: Arc::new(NoContext),
            knowledge: Arc::new(NoContext),
            pending: PendingDecisions::default(),
            tokens: SessionCancels::default(),
        }
    }

    /// Attach target/alert and knowledge sources used by [`think`](Self::think).
    #[must_use]
    pub fn with_context(
        mut self,
        ops: Arc<dyn OpsContext>,
        knowledge: Arc<dyn KnowledgeSearch>,
    ) -> Self {
        self.ops = ops;
        self.knowledge = knowledge;
        self
    }

    /// Registry of session cancellation tokens, for work driven outside
    /// [`run_loop`](Self::run_loop) that [`stop_session`](Self::stop_session)
    /// must still reach.
    #[must_use]
    pub fn session_cancels(&self) -> SessionCancels {
        self.tokens.clone()
    }

    /// Create an idle session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an empty goal or a zero step
    /// budget, or `AppError::Db` if the insert fails.
    pub async fn create_session(&self, params: NewSession) -> Result<Session> {
        if params.goal.trim().is_empty() {
            return Err(AppError::Validation("session goal must not be empty".into()));
        }
        if params.max_steps == Some(0) {
            return Err(AppError::Validation("max_steps must be at least 1".into()));
        }

        let session = self
            .sessions
            .create(&Session::new(params, self.config.agent.max_steps))
            .await?;
        info!(session_id = %session.id, max_steps = session.max_steps, "session created");
        self.notifier.emit(&AgentEvent::StatusChanged {
            session_id: session.id.clone(),
            status: session.status,
        });
        Ok(session)
    }

    /// Fetch a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if it does not exist.
    pub async fn session(&self, session_id: &str) -> Result<Session> {
        self.sessions.require(session_id).await
    }

    /// Steps of a session in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn steps(&self, session_id: &str) -> Result<Vec<Step>> {
        self.steps.list_for_session(session_id).await
    }

    /// The step a session is waiting on, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn pending_step(&self, session_id: &str) -> Result<Option<Step>> {
        self.steps.get_pending(session_id).await
    }

    /// Ask the model for the next action of `session`.
    ///
    /// Exactly one LLM call; a reply that is not a valid action is an
    /// `AppError::Parse` and is not retried.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or `AppError::Parse`.
    pub async fn think(&self, session: &Session, provider: &dyn LlmProvider) -> Result<AgentAction> {
        let history = self.steps.list_for_session(&session.id).await?;
        let context = self.gather_context(session).await;
        let conversation = build_conversation(session, &context, &history, &self.config.agent);

        debug!(
            session_id = %session.id,
            provider = provider.name(),
            turns = conversation.len(),
            "requesting next action"
        );
        let reply = provider.complete(SYSTEM_PROMPT, &conversation).await?;
        let action = AgentAction::parse(&reply)?;
        info!(session_id = %session.id, action = action.name(), "agent proposed action");
        Ok(action)
    }

    /// Persist the next step of a session and announce it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if a step is already pending or
    /// the session has ended.
    pub async fn create_step(&self, session_id: &str, action: &AgentAction) -> Result<Step> {
        let step = self.steps.create_next(session_id, action).await?;
        self.notifier.emit(&AgentEvent::StepCreated { step: step.clone() });
        Ok(step)
    }

    /// Run an approved command step through `executor`.
    ///
    /// Executor failures and timeouts are captured on the step as
    /// `[ERROR: <Type>: <message>]` with exit code `-1` and status `Failed`;
    /// they are not returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not an approved
    /// command, or `AppError::Db` if persistence fails.
    pub async fn execute_command(&self, step: &Step, executor: &dyn Executor) -> Result<Step> {
        if step.step_type != StepType::Command {
            return Err(AppError::InvalidTransition(format!(
                "step {} is not a command",
                step.id
            )));
        }

        let running = self.steps.start_execution(&step.id).await?;
        self.notifier.emit(&AgentEvent::StepUpdated { step: running });

        let seconds = self.config.timeouts.command_seconds;
        let outcome = match tokio::time::timeout(
            self.config.command_timeout(),
            executor.execute(&step.content, seconds),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "command did not finish within {seconds} seconds"
            ))),
        };

        let finished = match outcome {
            Ok(output) => {
                let exit_code = output.resolved_exit_code();
                info!(step_id = %step.id, exit_code, "command executed");
                self.steps
                    .finish_execution(
                        &step.id,
                        StepStatus::Executed,
                        &output.merged_output(),
                        exit_code,
                    )
                    .await?
            }
            Err(err) => {
                warn!(step_id = %step.id, %err, "command execution failed");
                self.steps
                    .finish_execution(&step.id, StepStatus::Failed, &err.marker(), -1)
                    .await?
            }
        };

        self.notifier.emit(&AgentEvent::StepUpdated {
            step: finished.clone(),
        });
        Ok(finished)
    }

    /// Approve a pending command step and wake its loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not a pending
    /// command, or `AppError::NotFound` if it does not exist.
    pub async fn approve_step(&self, step_id: &str) -> Result<Step> {
        self.require_kind(step_id, StepType::Command).await?;
        let step = self.steps.approve(step_id).await?;
        info!(step_id, session_id = %step.session_id, "step approved");
        self.notifier.emit(&AgentEvent::StepUpdated { step: step.clone() });
        self.deliver(step_id, StepDecision::Approved).await;
        Ok(step)
    }

    /// Reject a pending command step and wake its loop.
    ///
    /// The step output becomes `[User rejected this command]`, which the
    /// next `think` call sees.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not a pending
    /// command, or `AppError::NotFound` if it does not exist.
    pub async fn reject_step(&self, step_id: &str) -> Result<Step> {
        self.require_kind(step_id, StepType::Command).await?;
        let step = self.steps.reject(step_id, REJECTED_OUTPUT).await?;
        info!(step_id, session_id = %step.session_id, "step rejected");
        self.notifier.emit(&AgentEvent::StepUpdated { step: step.clone() });
        self.deliver(step_id, StepDecision::Rejected).await;
        Ok(step)
    }

    /// Write an operator answer into a pending question step and wake its loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the step is not a pending
    /// question, or `AppError::NotFound` if it does not exist.
    pub async fn answer_question(&self, step_id: &str, answer: &str) -> Result<Step> {
        self.require_kind(step_id, StepType::Question).await?;
        let step = self.steps.answer(step_id, answer).await?;
        info!(step_id, session_id = %step.session_id, "question answered");
        self.notifier.emit(&AgentEvent::StepUpdated { step: step.clone() });
        self.deliver(step_id, StepDecision::Answered).await;
        Ok(step)
    }

    /// Stop a session. Stopping a session that already ended is a no-op.
    ///
    /// Cancels the running loop, if any, and fails its unfinished steps.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn stop_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("stop_session", session_id);
        async {
            if self.tokens.cancel(session_id).await {
                debug!("cancelled running work");
            }
            self.mark_stopped(session_id).await
        }
        .instrument(span)
        .await
    }

    /// Drive a session until it ends.
    ///
    /// Equivalent to [`run_loop_with_cancel`](Self::run_loop_with_cancel)
    /// with a fresh token; use [`stop_session`](Self::stop_session) to end it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist or
    /// `AppError::Db` if the final state cannot be read. Errors inside the
    /// loop fail the session instead of being returned.
    pub async fn run_loop(
        &self,
        session_id: &str,
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn Executor>,
    ) -> Result<Session> {
        self.run_loop_with_cancel(session_id, provider, executor, CancellationToken::new())
            .await
    }

    /// Drive a session until it ends or `cancel` fires.
    ///
    /// Cancellation leaves the session `Stopped`; any other error leaves it
    /// `Failed` with the error text. A `complete` event is emitted on exit.
    ///
    /// # Errors
    ///
    /// See [`run_loop`](Self::run_loop).
    pub async fn run_loop_with_cancel(
        &self,
        session_id: &str,
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn Executor>,
        cancel: CancellationToken,
    ) -> Result<Session> {
        self.tokens.register(session_id, cancel.clone()).await;

        let span = info_span!("agent_loop", session_id);
        let result = self
            .drive(session_id, provider.as_ref(), executor.as_ref(), &cancel)
            .instrument(span)
            .await;

        self.tokens.release(session_id).await;

        match result {
            Ok(()) => {}
            Err(AppError::Cancelled(reason)) => {
                info!(session_id, %reason, "agent loop cancelled");
                self.mark_stopped(session_id).await?;
            }
            Err(err) => {
                error!(session_id, %err, "agent loop failed");
                self.fail_session(session_id, &err.to_string(), &err.marker())
                    .await?;
            }
        }

        let session = self.sessions.require(session_id).await?;
        self.notifier.emit(&AgentEvent::Complete {
            session_id: session.id.clone(),
            status: session.status,
            summary: session.summary.clone(),
            error_message: session.error_message.clone(),
        });
        Ok(session)
    }

    async fn drive(
        &self,
        session_id: &str,
        provider: &dyn LlmProvider,
        executor: &dyn Executor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(stopped());
            }

            let session = self.sessions.require(session_id).await?;
            if session.status.is_terminal() {
                return Ok(());
            }
            if session.current_step_number >= session.max_steps {
                let message = format!(
                    "agent reached maximum step limit ({} steps) without completing",
                    session.max_steps
                );
                warn!(session_id, max_steps = session.max_steps, "step budget exhausted");
                self.fail_session(session_id, &message, &message).await?;
                return Ok(());
            }

            let session = self.set_status(session_id, SessionStatus::Thinking).await?;
            let action = cancellable(cancel, self.think(&session, provider)).await?;
            let step = self.create_step(session_id, &action).await?;

            match action {
                AgentAction::Command { .. } => {
                    let step = if session.auto_approve {
                        let approved = self.steps.approve(&step.id).await?;
                        self.notifier.emit(&AgentEvent::StepUpdated {
                            step: approved.clone(),
                        });
                        approved
                    } else {
                        self.await_decision(&step, None, cancel).await?
                    };

                    match step.status {
                        StepStatus::Approved => {
                            self.set_status(session_id, SessionStatus::Executing).await?;
                            cancellable(cancel, self.execute_command(&step, executor)).await?;
                        }
                        StepStatus::Rejected => {}
                        other => {
                            return Err(AppError::InvalidTransition(format!(
                                "step {} resumed in unexpected status {other:?}",
                                step.id
                            )));
                        }
                    }
                    self.set_status(session_id, SessionStatus::Analyzing).await?;
                }
                AgentAction::Question { .. } => {
                    let limit = self.config.question_timeout();
                    let step = self.await_decision(&step, limit, cancel).await?;
                    if step.status != StepStatus::Executed {
                        return Err(AppError::InvalidTransition(format!(
                            "question {} resumed in unexpected status {:?}",
                            step.id, step.status
                        )));
                    }
                    self.set_status(session_id, SessionStatus::Analyzing).await?;
                }
                AgentAction::Complete { ref content, .. } => {
                    self.close_step(&step.id).await?;
                    self.sessions.complete(session_id, content).await?;
                    info!(session_id, "session completed");
                    self.notify_status(session_id, SessionStatus::Completed);
                    return Ok(());
                }
                AgentAction::Failed { ref content, .. } => {
                    self.close_step(&step.id).await?;
                    self.sessions.fail(session_id, content).await?;
                    info!(session_id, "agent declared failure");
                    self.notify_status(session_id, SessionStatus::Failed);
                    return Ok(());
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(stopped()),
                () = tokio::time::sleep(self.config.iteration_delay()) => {}
            }
        }
    }

    /// Suspend until `step` is decided, returning its updated state.
    ///
    /// The waiter is registered before the session enters
    /// `AwaitingApproval` and the step is re-read afterwards, so a decision
    /// that lands in between is not missed.
    async fn await_decision(
        &self,
        step: &Step,
        limit: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(step.id.clone(), tx);

        let result = async {
            self.set_status(&step.session_id, SessionStatus::AwaitingApproval)
                .await?;
            let current = self.steps.require(&step.id).await?;
            if current.status != StepStatus::Pending {
                return Ok(current);
            }

            debug!(step_id = %step.id, "waiting for operator");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(stopped()),
                decision = wait_decision(rx, limit) => {
                    let decision = decision?;
                    debug!(step_id = %step.id, ?decision, "operator decision received");
                }
            }
            self.steps.require(&step.id).await
        }
        .await;

        self.pending.lock().await.remove(&step.id);
        result
    }

    async fn deliver(&self, step_id: &str, decision: StepDecision) {
        let tx = self.pending.lock().await.remove(step_id);
        match tx {
            Some(tx) => {
                if tx.send(decision).is_err() {
                    warn!(step_id, "decision receiver already dropped");
                }
            }
            None => debug!(step_id, "no loop waiting on step"),
        }
    }

    async fn require_kind(&self, step_id: &str, kind: StepType) -> Result<()> {
        let step = self.steps.require(step_id).await?;
        if step.step_type != kind {
            return Err(AppError::InvalidTransition(format!(
                "step {step_id} is a {:?} step, expected {kind:?}",
                step.step_type
            )));
        }
        Ok(())
    }

    async fn close_step(&self, step_id: &str) -> Result<()> {
        let step = self.steps.resolve(step_id).await?;
        self.notifier.emit(&AgentEvent::StepUpdated { step });
        Ok(())
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<Session> {
        let session = self.sessions.update_status(session_id, status).await?;
        self.notify_status(session_id, status);
        Ok(session)
    }

    fn notify_status(&self, session_id: &str, status: SessionStatus) {
        self.notifier.emit(&AgentEvent::StatusChanged {
            session_id: session_id.to_owned(),
            status,
        });
    }

    async fn mark_stopped(&self, session_id: &str) -> Result<Session> {
        let (session, changed) = self.sessions.stop(session_id).await?;
        if changed {
            let failed = self
                .steps
                .fail_open(session_id, &stopped().marker())
                .await?;
            info!(session_id, failed_steps = failed, "session stopped");
            self.notify_status(session_id, SessionStatus::Stopped);
        }
        Ok(session)
    }

    async fn fail_session(&self, session_id: &str, message: &str, step_output: &str) -> Result<()> {
        let session = self.sessions.require(session_id).await?;
        if session.status.is_terminal() {
            return Ok(());
        }

        self.steps.fail_open(session_id, step_output).await?;
        match self.sessions.fail(session_id, message).await {
            Ok(_) => {
                self.notify_status(session_id, SessionStatus::Failed);
                Ok(())
            }
            Err(AppError::InvalidTransition(reason)) => {
                debug!(session_id, %reason, "session ended before it could be failed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn gather_context(&self, session: &Session) -> PromptContext {
        let limits = &self.config.agent;
        let server = session.target_server_id.as_deref();
        let mut context = PromptContext::default();

        if let Some(server) = server {
            context.target = self.ops.target(server).await.unwrap_or_else(|err| {
                warn!(server, %err, "target lookup failed");
                None
            });
            context.open_alerts = self.ops.open_alerts(server).await.unwrap_or_else(|err| {
                warn!(server, %err, "open alert lookup failed");
                Vec::new()
            });
        }

        let similar = self
            .ops
            .similar_resolved_alerts(&session.goal, limits.resolved_alert_limit)
            .await;
        context.resolved_alerts = match similar {
            Ok(alerts) if !alerts.is_empty() => alerts,
            other => {
                if let Err(err) = other {
                    warn!(%err, "similar alert search failed, using recent history");
                }
                let since = Utc::now() - chrono::Duration::days(i64::from(limits.alert_history_days));
                self.ops
                    .resolved_alerts_since(server, since, limits.resolved_alert_limit)
                    .await
                    .unwrap_or_else(|err| {
                        warn!(%err, "resolved alert history lookup failed");
                        Vec::new()
                    })
            }
        };

        if session.current_step_number == 0 && limits.knowledge_top_k > 0 {
            context.knowledge = self
                .knowledge
                .search_similar(&session.goal, limits.knowledge_top_k)
                .await
                .unwrap_or_else(|err| {
                    warn!(%err, "knowledge search failed");
                    Vec::new()
                });
        }

        context
    }
}
