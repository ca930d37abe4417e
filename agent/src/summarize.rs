//! LM-generated history summaries.
//!
//! Compaction replaces old history with a structured checkpoint produced by
//! the model itself. Three prompt forms exist: an initial checkpoint, an
//! iterative update that merges new messages into a previous checkpoint, and
//! a turn-prefix summary used when the compaction cut falls inside a turn.
//!
//! Output budgets derive from the compaction reserve: checkpoints may use
//! 80% of the reserve, turn-prefix summaries 50%. Reasoning is requested at
//! high effort; providers without it simply ignore the option.

use strand_core::CancelToken;
use strand_core::llm::{
    Context, Message, Provider, ReasoningEffort, StopReason, StreamOptions, collect_final,
};

use crate::error::AgentError;

const SYSTEM_PROMPT: &str = include_str!("prompts/summary_system.txt");
const INITIAL_TEMPLATE: &str = include_str!("prompts/summary_initial.txt");
const UPDATE_TEMPLATE: &str = include_str!("prompts/summary_update.txt");
const TURN_PREFIX_TEMPLATE: &str = include_str!("prompts/turn_prefix.txt");

/// Separator joining the history checkpoint and the turn-prefix summary when
/// a compaction cut splits a turn. History first.
pub const SPLIT_TURN_SEPARATOR: &str = "\n\n---\n\n**Turn Context (split turn):**\n\n";

/// Generates the history checkpoint.
///
/// With `previous` present the update prompt is used and the new checkpoint
/// merges the prior one; otherwise the initial prompt runs.
///
/// # Errors
///
/// Returns [`AgentError::Summarization`] when the model fails; no retry is
/// attempted at this layer.
pub async fn summarize_history(
    provider: &dyn Provider,
    messages: &[Message],
    previous: Option<&str>,
    reserve_tokens: u64,
    cancel: &CancelToken,
) -> Result<String, AgentError> {
    let transcript = render_transcript(messages);
    let prompt = match previous {
        Some(previous) => UPDATE_TEMPLATE
            .replace("{previous}", previous)
            .replace("{transcript}", &transcript),
        None => INITIAL_TEMPLATE.replace("{transcript}", &transcript),
    };
    run_summary(provider, prompt, reserve_tokens * 8 / 10, cancel).await
}

/// Generates the turn-prefix summary for a split turn.
///
/// # Errors
///
/// Returns [`AgentError::Summarization`] when the model fails.
pub async fn summarize_turn_prefix(
    provider: &dyn Provider,
    messages: &[Message],
    reserve_tokens: u64,
    cancel: &CancelToken,
) -> Result<String, AgentError> {
    let transcript = render_transcript(messages);
    let prompt = TURN_PREFIX_TEMPLATE.replace("{transcript}", &transcript);
    run_summary(provider, prompt, reserve_tokens / 2, cancel).await
}

async fn run_summary(
    provider: &dyn Provider,
    prompt: String,
    max_tokens: u64,
    cancel: &CancelToken,
) -> Result<String, AgentError> {
    let context = Context {
        system_prompt: Some(SYSTEM_PROMPT.trim_end().to_string()),
        tools: Vec::new(),
        messages: vec![Message::user(prompt, 0)],
    };
    let options = StreamOptions::new()
        .with_max_tokens(u32::try_from(max_tokens).unwrap_or(u32::MAX))
        .with_reasoning(ReasoningEffort::High.clamp(provider.supports_xhigh()))
        .with_signal(cancel.clone());

    let message = collect_final(provider.stream(&context, &options))
        .await
        .ok_or_else(|| {
            AgentError::Summarization("summary stream ended without a terminal event".into())
        })?;

    if message.stop_reason == StopReason::Error || message.stop_reason == StopReason::Aborted {
        return Err(AgentError::Summarization(
            message
                .error_message
                .unwrap_or_else(|| "summary model returned an error".into()),
        ));
    }

    let summary = message.text();
    if summary.trim().is_empty() {
        return Err(AgentError::Summarization(
            "summary model returned empty output".into(),
        ));
    }
    Ok(summary)
}

/// Renders messages for a summarization prompt, one `role: content` block
/// per message.
#[must_use]
pub fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let text = message.display_text();
        if text.is_empty() {
            continue;
        }
        out.push_str(message.role());
        out.push_str(": ");
        out.push_str(&text);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_labels_roles() {
        let messages = vec![
            Message::user("fix the bug in src/lib.rs", 0),
            Message::custom("bash-execution", "cargo test", 1),
        ];
        let transcript = render_transcript(&messages);
        assert!(transcript.contains("user: fix the bug in src/lib.rs"));
        assert!(transcript.contains("bash-execution: cargo test"));
    }

    #[test]
    fn templates_carry_required_sections() {
        assert!(INITIAL_TEMPLATE.contains("## Goal"));
        assert!(INITIAL_TEMPLATE.contains("### Blocked"));
        assert!(INITIAL_TEMPLATE.contains("## Critical Context"));
        assert!(UPDATE_TEMPLATE.contains("<previous-summary>"));
        assert!(TURN_PREFIX_TEMPLATE.contains("## Original Request"));
        assert!(TURN_PREFIX_TEMPLATE.contains("## Context for Suffix"));
    }

    #[test]
    fn split_separator_orders_history_first() {
        assert!(SPLIT_TURN_SEPARATOR.contains("Turn Context (split turn)"));
    }
}
