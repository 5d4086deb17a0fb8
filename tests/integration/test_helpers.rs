//! Shared test helpers for engine-level integration tests.
//!
//! Provides scripted LLM providers, stub executors and a recording proposal
//! sink so individual test modules can focus on behaviour rather than
//! wiring.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remediation_engine::config::GlobalConfig;
use chrono::{DateTime, Utc};
use remediation_engine::integrations::{
    BoxFuture, ChatMessage, ExecOutput, Executor, KnowledgeSearch, LlmProvider, OpsContext,
    Proposal, ProposalSink, ProviderRegistry, SharedExecutor,
};
use remediation_engine::models::context::{Alert, KnowledgeSnippet, TargetServer};
use remediation_engine::notify::Notifier;
use remediation_engine::orchestrator::EngineDeps;
use remediation_engine::persistence::db::{self, Database};
use remediation_engine::AppError;
use serde_json::json;
use tokio::sync::Semaphore;

/// Config with a negligible loop delay and short command timeout.
pub fn test_config() -> GlobalConfig {
    GlobalConfig::from_toml_str(
        r"
[agent]
iteration_delay_ms = 1
knowledge_top_k = 0

[timeouts]
command_seconds = 5

[scheduler]
max_iterations = 5
shutdown_grace_seconds = 2
",
    )
    .expect("valid test config")
}

/// Fresh in-memory database.
pub async fn test_db() -> Arc<Database> {
    Arc::new(db::connect_memory().await.expect("in-memory db"))
}

/// Engine dependencies around a single provider and executor.
pub fn engine_deps(
    db: &Arc<Database>,
    config: GlobalConfig,
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn Executor>,
) -> EngineDeps {
    EngineDeps {
        db: Arc::clone(db),
        config: Arc::new(config),
        notifier: Notifier::none(),
        providers: Arc::new(ProviderRegistry::single(provider)),
        executors: Arc::new(SharedExecutor(executor)),
        proposals: Arc::new(RecordingProposals::default()),
    }
}

/// Poll `check` until it returns `true`, panicking after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn command(cmd: &str) -> String {
    json!({ "action": "command", "content": cmd, "reasoning": "diagnose" }).to_string()
}

pub fn question(text: &str) -> String {
    json!({ "action": "question", "content": text, "reasoning": "need input" }).to_string()
}

pub fn complete(summary: &str) -> String {
    json!({ "action": "complete", "content": summary, "reasoning": "verified" }).to_string()
}

pub fn failed(reason: &str) -> String {
    json!({ "action": "failed", "content": reason, "reasoning": "gave up" }).to_string()
}

/// Provider that replays a fixed list of replies and records every
/// conversation it was shown. The last reply repeats once the script ends.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(String::new()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Conversations passed to each `complete` call, in order.
    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete<'a>(
        &'a self,
        _system_prompt: &'a str,
        conversation: &'a [ChatMessage],
    ) -> BoxFuture<'a, remediation_engine::Result<String>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push(conversation.to_vec());
            let next = self.replies.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(reply) = next {
                *last = reply;
            }
            Ok(last.clone())
        })
    }
}

/// Provider that blocks each call until a permit is released.
pub struct GatedProvider {
    gate: Semaphore,
    reply: String,
}

impl GatedProvider {
    pub fn new(reply: String) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            reply,
        })
    }

    /// Let `n` more calls through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

impl LlmProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    fn complete<'a>(
        &'a self,
        _system_prompt: &'a str,
        _conversation: &'a [ChatMessage],
    ) -> BoxFuture<'a, remediation_engine::Result<String>> {
        Box::pin(async move {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AppError::Llm(e.to_string()))?;
            permit.forget();
            Ok(self.reply.clone())
        })
    }
}

/// Executor returning a fixed outcome and recording the commands it ran.
pub struct StubExecutor {
    outcome: Result<ExecOutput, String>,
    ran: Mutex<Vec<String>>,
}

impl StubExecutor {
    pub fn ok(stdout: &str) -> Arc<Self> {
        Self::returning(ExecOutput::ok(stdout))
    }

    pub fn returning(output: ExecOutput) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(output),
            ran: Mutex::new(Vec::new()),
        })
    }

    /// Executor whose transport always fails with `message`.
    pub fn broken(message: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(message.to_owned()),
            ran: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }
}

impl Executor for StubExecutor {
    fn execute<'a>(
        &'a self,
        command: &'a str,
        _timeout_seconds: u64,
    ) -> BoxFuture<'a, remediation_engine::Result<ExecOutput>> {
        Box::pin(async move {
            self.ran.lock().unwrap().push(command.to_owned());
            self.outcome.clone().map_err(AppError::Executor)
        })
    }
}

/// Executor that never returns.
pub struct HangingExecutor;

impl Executor for HangingExecutor {
    fn execute<'a>(
        &'a self,
        _command: &'a str,
        _timeout_seconds: u64,
    ) -> BoxFuture<'a, remediation_engine::Result<ExecOutput>> {
        Box::pin(std::future::pending())
    }
}

/// Proposal sink that keeps every proposal.
#[derive(Default)]
pub struct RecordingProposals {
    received: Mutex<Vec<Proposal>>,
}

impl RecordingProposals {
    pub fn proposals(&self) -> Vec<Proposal> {
        self.received.lock().unwrap().clone()
    }
}

impl ProposalSink for RecordingProposals {
    fn propose<'a>(&'a self, proposal: &'a Proposal) -> BoxFuture<'a, remediation_engine::Result<()>> {
        Box::pin(async move {
            self.received.lock().unwrap().push(proposal.clone());
            Ok(())
        })
    }
}

/// Build an alert for context fixtures.
pub fn alert(title: &str, severity: &str, resolution: Option<&str>) -> Alert {
    Alert {
        id: format!("alert-{title}"),
        title: title.into(),
        severity: severity.into(),
        status: if resolution.is_some() { "resolved" } else { "open" }.into(),
        created_at: Utc::now(),
        resolution: resolution.map(Into::into),
    }
}

/// Canned target, alert and knowledge sources that record how they were
/// queried.
#[derive(Default)]
pub struct RecordingContext {
    pub target: Option<TargetServer>,
    pub open: Vec<Alert>,
    /// `None` makes similarity search fail.
    pub similar: Option<Vec<Alert>>,
    pub history: Vec<Alert>,
    pub knowledge: Vec<KnowledgeSnippet>,
    pub history_queries: Mutex<Vec<(Option<String>, DateTime<Utc>)>>,
    pub knowledge_queries: Mutex<Vec<String>>,
}

impl RecordingContext {
    /// `(server, since)` of every resolved-history lookup.
    pub fn history_queries(&self) -> Vec<(Option<String>, DateTime<Utc>)> {
        self.history_queries.lock().unwrap().clone()
    }

    /// Queries passed to knowledge search.
    pub fn knowledge_queries(&self) -> Vec<String> {
        self.knowledge_queries.lock().unwrap().clone()
    }
}

impl OpsContext for RecordingContext {
    fn target<'a>(
        &'a self,
        _server_id: &'a str,
    ) -> BoxFuture<'a, remediation_engine::Result<Option<TargetServer>>> {
        Box::pin(async move { Ok(self.target.clone()) })
    }

    fn open_alerts<'a>(
        &'a self,
        _server_id: &'a str,
    ) -> BoxFuture<'a, remediation_engine::Result<Vec<Alert>>> {
        Box::pin(async move { Ok(self.open.clone()) })
    }

    fn similar_resolved_alerts<'a>(
        &'a self,
        _query: &'a str,
        _limit: usize,
    ) -> BoxFuture<'a, remediation_engine::Result<Vec<Alert>>> {
        Box::pin(async move {
            self.similar
                .clone()
                .ok_or_else(|| AppError::Executor("vector index offline".into()))
        })
    }

    fn resolved_alerts_since<'a>(
        &'a self,
        server_id: Option<&'a str>,
        since: DateTime<Utc>,
        _limit: usize,
    ) -> BoxFuture<'a, remediation_engine::Result<Vec<Alert>>> {
        Box::pin(async move {
            self.history_queries
                .lock()
                .unwrap()
                .push((server_id.map(str::to_owned), since));
            Ok(self.history.clone())
        })
    }
}

impl KnowledgeSearch for RecordingContext {
    fn search_similar<'a>(
        &'a self,
        query: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, remediation_engine::Result<Vec<KnowledgeSnippet>>> {
        Box::pin(async move {
            self.knowledge_queries.lock().unwrap().push(query.to_owned());
            Ok(self.knowledge.iter().take(limit).cloned().collect())
        })
    }
}
