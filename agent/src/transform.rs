//! Cross-model message normalization.
//!
//! A session may contain assistant messages produced by several different
//! models. Before any provider call the history is normalized for the target
//! model in two passes:
//!
//! 1. **Per-message cleanup** — provider-private signatures survive only
//!    same-model replay; thinking blocks downgrade to text across models
//!    (empty ones drop); tool-call ids are rewritten through an optional
//!    normalizer, with matching tool-result references remapped.
//! 2. **Orphan repair** — assistant messages with failure stop reasons are
//!    dropped outright, and any tool call left without a result before the
//!    next user message or tool-calling assistant receives a synthesized
//!    error result, so the target API never sees a dangling call.
//!
//! Both passes are pure functions over the message list; the working context
//! owned by the loop is never mutated.

use std::sync::Arc;

use strand_core::llm::{AssistantMessage, ContentBlock, Message, ModelRef, TextContent};

use crate::config::ConvertToLlmFn;

/// Text of the result synthesized for a tool call that never got one.
pub const NO_RESULT_TEXT: &str = "No result provided";

/// Maps a tool-call id to one acceptable to the target model.
///
/// Receives the original id, the target model, and the assistant message the
/// call belongs to. Must be deterministic and collision-free within one
/// transform run.
pub type ToolCallIdNormalizer =
    Arc<dyn Fn(&str, &ModelRef, &AssistantMessage) -> String + Send + Sync>;

/// Returns `true` when `id` already satisfies the portable id grammar
/// `^[A-Za-z0-9_-]{1,64}$`.
#[must_use]
pub fn is_portable_tool_call_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Standard id normalizer: portable ids pass through, anything else is
/// rewritten to a sequential `toolu_NNNN` id.
#[must_use]
pub fn sequential_id_normalizer() -> ToolCallIdNormalizer {
    let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
    Arc::new(move |id, _model, _message| {
        if is_portable_tool_call_id(id) {
            id.to_string()
        } else {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            format!("toolu_{n:04}")
        }
    })
}

/// Maps custom messages through the caller-supplied converter.
///
/// Custom variants the converter maps to nothing are dropped from model
/// context; all other messages pass through unchanged.
#[must_use]
pub fn convert_custom(messages: &[Message], convert: &ConvertToLlmFn) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            Message::Custom(custom) => out.extend(convert(custom)),
            other => out.push(other.clone()),
        }
    }
    out
}

/// Normalizes a history for the target model.
///
/// Applying the transform twice with the same target is a no-op: signatures
/// are already stripped, ids already portable, and synthesized results close
/// every orphan.
#[must_use]
pub fn transform_for_model(
    messages: Vec<Message>,
    target: &ModelRef,
    normalize_id: Option<&ToolCallIdNormalizer>,
    now_ms: i64,
) -> Vec<Message> {
    let cleaned = clean_for_model(messages, target, normalize_id);
    repair_orphans(cleaned, now_ms)
}

fn clean_for_model(
    messages: Vec<Message>,
    target: &ModelRef,
    normalize_id: Option<&ToolCallIdNormalizer>,
) -> Vec<Message> {
    let mut renamed: std::collections::BTreeMap<String, String> = std::collections::BTreeMap::new();
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        match message {
            Message::Assistant(mut assistant) => {
                let same_model = assistant.model.same_model(target);
                let source = assistant.clone();
                let old_content = std::mem::take(&mut assistant.content);
                let mut content = Vec::with_capacity(old_content.len());
                for block in old_content {
                    match block {
                        ContentBlock::Thinking(thinking) => {
                            if same_model && thinking.signature.is_some() {
                                content.push(ContentBlock::Thinking(thinking));
                            } else if thinking.thinking.is_empty() {
                                // Empty thinking blocks are dropped, not kept
                                // as empties.
                            } else if same_model {
                                content.push(ContentBlock::Thinking(thinking));
                            } else {
                                content.push(ContentBlock::Text(TextContent::new(
                                    thinking.thinking,
                                )));
                            }
                        }
                        ContentBlock::Text(mut text) => {
                            if !same_model {
                                text.signature = None;
                            }
                            content.push(ContentBlock::Text(text));
                        }
                        ContentBlock::ToolCall(mut call) => {
                            if !same_model {
                                call.thought_signature = None;
                                if let Some(normalize) = normalize_id {
                                    let new_id = normalize(&call.id, target, &source);
                                    if new_id != call.id {
                                        renamed.insert(call.id.clone(), new_id.clone());
                                        call.id = new_id;
                                    }
                                }
                            }
                            content.push(ContentBlock::ToolCall(call));
                        }
                        other => content.push(other),
                    }
                }
                assistant.content = content;
                out.push(Message::Assistant(assistant));
            }
            Message::ToolResult(mut result) => {
                if let Some(new_id) = renamed.get(&result.tool_call_id) {
                    result.tool_call_id = new_id.clone();
                }
                out.push(Message::ToolResult(result));
            }
            other => out.push(other),
        }
    }
    out
}

fn repair_orphans(messages: Vec<Message>, now_ms: i64) -> Vec<Message> {
    // Tool calls of the most recent retained assistant still awaiting a
    // result, as (id, tool name).
    let mut pending: Vec<(String, String)> = Vec::new();
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        match message {
            Message::Assistant(assistant) if assistant.stop_reason.is_failure() => {
                // Never replayed to any model.
            }
            Message::Assistant(assistant) => {
                let calls: Vec<(String, String)> = assistant
                    .tool_calls()
                    .map(|call| (call.id.clone(), call.name.clone()))
                    .collect();
                if !calls.is_empty() {
                    flush_pending(&mut pending, &mut out, now_ms);
                    pending = calls;
                }
                out.push(Message::Assistant(assistant));
            }
            Message::ToolResult(result) => {
                pending.retain(|(id, _)| id != &result.tool_call_id);
                out.push(Message::ToolResult(result));
            }
            Message::User(user) => {
                flush_pending(&mut pending, &mut out, now_ms);
                out.push(Message::User(user));
            }
            custom @ Message::Custom(_) => out.push(custom),
        }
    }
    flush_pending(&mut pending, &mut out, now_ms);
    out
}

fn flush_pending(pending: &mut Vec<(String, String)>, out: &mut Vec<Message>, now_ms: i64) {
    for (id, name) in pending.drain(..) {
        out.push(Message::tool_result(id, name, NO_RESULT_TEXT, true, now_ms));
    }
}

/// Convenience: converts custom variants, then normalizes for the target.
#[must_use]
pub fn to_model_context(
    messages: &[Message],
    target: &ModelRef,
    convert: &ConvertToLlmFn,
    normalize_id: Option<&ToolCallIdNormalizer>,
    now_ms: i64,
) -> Vec<Message> {
    transform_for_model(convert_custom(messages, convert), target, normalize_id, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::llm::{StopReason, ThinkingContent, ToolCall, Usage};

    fn model_a() -> ModelRef {
        ModelRef::new("anthropic", "anthropic-messages", "claude-sonnet-4")
    }

    fn model_b() -> ModelRef {
        ModelRef::new("openai", "openai-responses", "gpt-5")
    }

    fn assistant(model: ModelRef, content: Vec<ContentBlock>) -> Message {
        Message::Assistant(AssistantMessage {
            content,
            stop_reason: StopReason::ToolUse,
            model,
            usage: Usage::default(),
            error_message: None,
            timestamp: 0,
        })
    }

    fn signed_thinking(text: &str) -> ContentBlock {
        ContentBlock::Thinking(ThinkingContent {
            thinking: text.into(),
            signature: Some("sig".into()),
        })
    }

    #[test]
    fn same_model_preserves_signatures() {
        let history = vec![assistant(model_a(), vec![signed_thinking("let me think")])];
        let out = transform_for_model(history, &model_a(), None, 0);
        match &out[0] {
            Message::Assistant(a) => match &a.content[0] {
                ContentBlock::Thinking(t) => assert_eq!(t.signature.as_deref(), Some("sig")),
                other => panic!("unexpected block {other:?}"),
            },
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn cross_model_downgrades_thinking_to_text() {
        let history = vec![assistant(
            model_a(),
            vec![
                signed_thinking("reasoning"),
                ContentBlock::Thinking(ThinkingContent::new("")),
            ],
        )];
        let out = transform_for_model(history, &model_b(), None, 0);
        match &out[0] {
            Message::Assistant(a) => {
                assert_eq!(a.content.len(), 1);
                assert_eq!(a.content[0].as_text(), Some("reasoning"));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn cross_model_strips_tool_call_thought_signature() {
        let mut call = ToolCall::new("call_1", "ls", json!({"path": "."}));
        call.thought_signature = Some("ts".into());
        let history = vec![
            assistant(model_a(), vec![ContentBlock::ToolCall(call)]),
            Message::tool_result("call_1", "ls", "ok", false, 0),
        ];
        let out = transform_for_model(history, &model_b(), None, 0);
        match &out[0] {
            Message::Assistant(a) => {
                let call = a.tool_calls().next().unwrap();
                assert!(call.thought_signature.is_none());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn long_ids_rewrite_and_results_follow() {
        let long_id = "x".repeat(480);
        let history = vec![
            assistant(
                model_a(),
                vec![ContentBlock::ToolCall(ToolCall::new(
                    long_id.clone(),
                    "ls",
                    json!({}),
                ))],
            ),
            Message::tool_result(long_id, "ls", "ok", false, 0),
        ];
        let normalizer = sequential_id_normalizer();
        let out = transform_for_model(history, &model_b(), Some(&normalizer), 0);

        let Message::Assistant(a) = &out[0] else {
            panic!("expected assistant");
        };
        let new_id = &a.tool_calls().next().unwrap().id;
        assert!(is_portable_tool_call_id(new_id));
        assert_eq!(new_id, "toolu_0001");

        let Message::ToolResult(r) = &out[1] else {
            panic!("expected tool result");
        };
        assert_eq!(&r.tool_call_id, new_id);
    }

    #[test]
    fn same_model_keeps_ids_even_with_normalizer() {
        let long_id = "x".repeat(480);
        let history = vec![assistant(
            model_a(),
            vec![ContentBlock::ToolCall(ToolCall::new(
                long_id.clone(),
                "ls",
                json!({}),
            ))],
        )];
        let normalizer = sequential_id_normalizer();
        let out = transform_for_model(history, &model_a(), Some(&normalizer), 0);
        let Message::Assistant(a) = &out[0] else {
            panic!("expected assistant");
        };
        assert_eq!(a.tool_calls().next().unwrap().id, long_id);
    }

    #[test]
    fn errored_assistants_drop() {
        let mut failed = AssistantMessage::partial(model_a(), 0);
        failed.stop_reason = StopReason::Error;
        let history = vec![
            Message::user("hi", 0),
            Message::Assistant(failed),
            Message::user("again", 1),
        ];
        let out = transform_for_model(history, &model_a(), None, 0);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| m.as_assistant().is_none()));
    }

    #[test]
    fn orphan_calls_get_synthetic_results() {
        let history = vec![
            assistant(
                model_a(),
                vec![
                    ContentBlock::ToolCall(ToolCall::new("a", "ls", json!({}))),
                    ContentBlock::ToolCall(ToolCall::new("b", "cat", json!({}))),
                ],
            ),
            Message::tool_result("a", "ls", "ok", false, 0),
            Message::user("next", 1),
        ];
        let out = transform_for_model(history, &model_a(), None, 42);
        // assistant, result a, synthetic result b, user
        assert_eq!(out.len(), 4);
        let Message::ToolResult(synth) = &out[2] else {
            panic!("expected synthetic result, got {:?}", out[2]);
        };
        assert_eq!(synth.tool_call_id, "b");
        assert!(synth.is_error);
        assert_eq!(synth.timestamp, 42);
        assert_eq!(synth.content[0].as_text(), Some(NO_RESULT_TEXT));
    }

    #[test]
    fn trailing_orphans_close_at_end() {
        let history = vec![assistant(
            model_a(),
            vec![ContentBlock::ToolCall(ToolCall::new("a", "ls", json!({})))],
        )];
        let out = transform_for_model(history, &model_a(), None, 0);
        assert_eq!(out.len(), 2);
        assert!(out[1].as_tool_result().unwrap().is_error);
    }

    #[test]
    fn unmatched_results_pass_through() {
        let history = vec![Message::tool_result("ghost", "ls", "ok", false, 0)];
        let out = transform_for_model(history, &model_a(), None, 0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn transform_is_idempotent() {
        let long_id = "not a portable id!".to_string();
        let history = vec![
            Message::user("hi", 0),
            assistant(
                model_a(),
                vec![
                    signed_thinking("thought"),
                    ContentBlock::ToolCall(ToolCall::new(long_id.clone(), "ls", json!({}))),
                ],
            ),
        ];
        let normalizer = sequential_id_normalizer();
        let once = transform_for_model(history, &model_b(), Some(&normalizer), 7);
        let normalizer_again = sequential_id_normalizer();
        let twice = transform_for_model(once.clone(), &model_b(), Some(&normalizer_again), 7);
        assert_eq!(once, twice);
    }

    #[test]
    fn orphan_closure_holds_for_every_retained_call() {
        // Property 1, spot-checked over a mixed history.
        let history = vec![
            Message::user("go", 0),
            assistant(
                model_a(),
                vec![ContentBlock::ToolCall(ToolCall::new("a", "ls", json!({})))],
            ),
            assistant(
                model_a(),
                vec![ContentBlock::ToolCall(ToolCall::new("b", "cat", json!({})))],
            ),
            Message::user("stop", 1),
        ];
        let out = transform_for_model(history, &model_a(), None, 0);

        let mut open: Vec<String> = Vec::new();
        for message in &out {
            match message {
                Message::Assistant(a) => {
                    let calls: Vec<String> = a.tool_calls().map(|c| c.id.clone()).collect();
                    if !calls.is_empty() {
                        assert!(open.is_empty(), "dangling calls {open:?}");
                        open = calls;
                    }
                }
                Message::ToolResult(r) => {
                    open.retain(|id| id != &r.tool_call_id);
                }
                Message::User(_) => assert!(open.is_empty(), "dangling calls {open:?}"),
                Message::Custom(_) => {}
            }
        }
        assert!(open.is_empty());
    }
}
