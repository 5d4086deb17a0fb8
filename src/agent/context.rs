//! Prompt assembly for the interactive agent.
//!
//! The conversation sent to the model is rebuilt from the database on every
//! turn: one context message (goal, target, alerts, knowledge) followed by
//! each prior step as an assistant action and, where it produced one, a user
//! message carrying its outcome.

use serde_json::json;

use crate::config::AgentConfig;
use crate::integrations::ChatMessage;
use crate::models::context::{Alert, KnowledgeSnippet, TargetServer};
use crate::models::session::Session;
use crate::models::step::{Step, StepStatus, StepType};

/// Instructions sent as the system prompt on every turn.
pub const SYSTEM_PROMPT: &str = "You are an infrastructure remediation agent working on a \
single target server. Work toward the goal one action at a time.\n\
Reply with exactly one JSON object and nothing else:\n\
{\"action\": \"command\" | \"question\" | \"complete\" | \"failed\", \
\"content\": \"...\", \"reasoning\": \"...\"}\n\
- command: content is one shell command to run on the target.\n\
- question: content is a question for the operator.\n\
- complete: content summarises what was fixed.\n\
- failed: content explains why the goal cannot be reached.\n\
Prefer read-only diagnostics before making changes.";

const NEXT_ACTION_PROMPT: &str = "Decide the next action. Reply with the JSON object only.";

/// Operational context gathered for one turn.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Target server metadata.
    pub target: Option<TargetServer>,
    /// Alerts currently open on the target.
    pub open_alerts: Vec<Alert>,
    /// Historically resolved alerts that look related.
    pub resolved_alerts: Vec<Alert>,
    /// Knowledge base snippets (first step only).
    pub knowledge: Vec<KnowledgeSnippet>,
}

/// Keep the first `head` and last `tail` characters of `text`.
///
/// Text no longer than `head + tail` characters is returned unchanged.
/// Counting is by `char`, never splitting a code point.
#[must_use]
pub fn truncate_output(text: &str, head: usize, tail: usize) -> String {
    let total = text.chars().count();
    if total <= head + tail {
        return text.to_owned();
    }

    let omitted = total - head - tail;
    let start: String = text.chars().take(head).collect();
    let end: String = text.chars().skip(total - tail).collect();
    format!("{start}\n... [{omitted} characters truncated] ...\n{end}")
}

/// Build the conversation for the next `think` call.
#[must_use]
pub fn build_conversation(
    session: &Session,
    context: &PromptContext,
    history: &[Step],
    limits: &AgentConfig,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::user(render_context(session, context))];

    for step in history {
        messages.push(ChatMessage::assistant(render_action(step)));
        if let Some(outcome) = render_outcome(step, limits) {
            messages.push(ChatMessage::user(outcome));
        }
    }

    messages.push(ChatMessage::user(NEXT_ACTION_PROMPT));
    messages
}

fn render_context(session: &Session, context: &PromptContext) -> String {
    let mut out = format!("Goal: {}\n", session.goal);

    if let Some(ref target) = context.target {
        out.push_str(&format!("\nTarget server: {} ({})\n", target.hostname, target.id));
        if let Some(ref os) = target.os {
            out.push_str(&format!("OS: {os}\n"));
        }
        if let Some(ref env) = target.environment {
            out.push_str(&format!("Environment: {env}\n"));
        }
        if let Some(ref description) = target.description {
            out.push_str(&format!("Description: {description}\n"));
        }
    } else if let Some(ref id) = session.target_server_id {
        out.push_str(&format!("\nTarget server: {id}\n"));
    }

    if !context.open_alerts.is_empty() {
        out.push_str("\nOpen alerts on the target:\n");
        for alert in &context.open_alerts {
            out.push_str(&format!(
                "- [{}] {} (since {})\n",
                alert.severity,
                alert.title,
                alert.created_at.format("%Y-%m-%d %H:%M UTC")
            ));
        }
    }

    if !context.resolved_alerts.is_empty() {
        out.push_str("\nPreviously resolved alerts:\n");
        for alert in &context.resolved_alerts {
            match alert.resolution {
                Some(ref resolution) => {
                    out.push_str(&format!("- {}: {resolution}\n", alert.title));
                }
                None => out.push_str(&format!("- {}\n", alert.title)),
            }
        }
    }

    if !context.knowledge.is_empty() {
        out.push_str("\nRelevant knowledge:\n");
        for snippet in &context.knowledge {
            out.push_str(&format!("### {}\n{}\n", snippet.title, snippet.content));
        }
    }

    out
}

fn action_name(step_type: StepType) -> &'static str {
    match step_type {
        StepType::Command => "command",
        StepType::Analysis => "analysis",
        StepType::Question => "question",
        StepType::Complete => "complete",
        StepType::Failed => "failed",
    }
}

fn render_action(step: &Step) -> String {
    json!({
        "action": action_name(step.step_type),
        "content": step.content,
        "reasoning": step.reasoning.as_deref().unwrap_or_default(),
    })
    .to_string()
}

fn render_outcome(step: &Step, limits: &AgentConfig) -> Option<String> {
    let output = step.output.as_deref().unwrap_or_default();
    match (step.step_type, step.status) {
        (StepType::Command, StepStatus::Executed | StepStatus::Failed) => {
            let exit_code = step
                .exit_code
                .map_or_else(|| "unknown".to_owned(), |code| code.to_string());
            Some(format!(
                "Step {} exit code: {exit_code}\nOutput:\n{}",
                step.step_number,
                truncate_output(output, limits.output_head_chars, limits.output_tail_chars)
            ))
        }
        (StepType::Command, StepStatus::Rejected) => {
            Some(format!("Step {}: {output}", step.step_number))
        }
        (StepType::Question, StepStatus::Executed) => {
            Some(format!("Operator answer to step {}: {output}", step.step_number))
        }
        (StepType::Question, StepStatus::Failed) => {
            Some(format!("Step {} got no answer: {output}", step.step_number))
        }
        _ => None,
    }
}
