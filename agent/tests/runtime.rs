//! End-to-end runtime scenarios over a scripted provider.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use strand_agent::clock::StepClock;
use strand_agent::compaction::CompactionConfig;
use strand_agent::{
    Agent, AgentConfig, AgentEvent, AgentSession, EventStream, MessageSourceFn,
};
use strand_core::llm::{
    AssistantMessage, AssistantMessageEvent, BoxEventStream, ContentBlock, Context, Message,
    ModelRef, StopReason, StreamOptions, TextContent, Tool, ToolCall, ToolResult, ToolUpdateFn,
    Tools, Usage,
};
use strand_core::{CancelToken, Provider};

fn model() -> ModelRef {
    ModelRef::new("test", "test-api", "test-model")
}

/// Provider that replays pre-scripted event sequences, one per call.
struct ScriptedProvider {
    model: ModelRef,
    scripts: Mutex<VecDeque<Vec<AssistantMessageEvent>>>,
    requests: Mutex<Vec<Context>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Vec<AssistantMessageEvent>>) -> Arc<Self> {
        Arc::new(Self {
            model: model(),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Context> {
        self.requests.lock().unwrap().clone()
    }
}

impl Provider for ScriptedProvider {
    fn model(&self) -> &ModelRef {
        &self.model
    }

    fn context_window(&self) -> u64 {
        100_000
    }

    fn stream(&self, context: &Context, _options: &StreamOptions) -> BoxEventStream {
        self.requests.lock().unwrap().push(context.clone());
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("provider called more times than scripted");
        Box::pin(futures_lite::stream::iter(events))
    }
}

/// Streams `text` as two deltas and stops normally.
fn text_turn(text: &str) -> Vec<AssistantMessageEvent> {
    let mut partial = AssistantMessage::partial(model(), 0);
    let mut events = vec![AssistantMessageEvent::Start {
        partial: partial.clone(),
    }];
    partial.content.push(ContentBlock::Text(TextContent::default()));
    events.push(AssistantMessageEvent::TextStart {
        content_index: 0,
        partial: partial.clone(),
    });
    let split = text.len() / 2;
    for chunk in [&text[..split], &text[split..]] {
        if chunk.is_empty() {
            continue;
        }
        if let ContentBlock::Text(t) = &mut partial.content[0] {
            t.text.push_str(chunk);
        }
        events.push(AssistantMessageEvent::TextDelta {
            content_index: 0,
            delta: chunk.into(),
            partial: partial.clone(),
        });
    }
    events.push(AssistantMessageEvent::TextEnd {
        content_index: 0,
        content: text.into(),
        partial: partial.clone(),
    });
    let mut message = partial;
    message.stop_reason = StopReason::Stop;
    message.usage = Usage {
        input: 10,
        output: 5,
        total_tokens: 15,
        ..Usage::default()
    };
    events.push(AssistantMessageEvent::Done {
        reason: StopReason::Stop,
        message,
    });
    events
}

/// Streams one tool-call turn for the given calls, arguments arriving as
/// split JSON fragments.
fn tool_turn(calls: &[(&str, &str, serde_json::Value)]) -> Vec<AssistantMessageEvent> {
    let mut partial = AssistantMessage::partial(model(), 0);
    let mut events = vec![AssistantMessageEvent::Start {
        partial: partial.clone(),
    }];
    for (index, (id, name, arguments)) in calls.iter().enumerate() {
        partial
            .content
            .push(ContentBlock::ToolCall(ToolCall::new(*id, *name, json!({}))));
        events.push(AssistantMessageEvent::ToolCallStart {
            content_index: index,
            partial: partial.clone(),
        });
        let rendered = arguments.to_string();
        let split = rendered.len() / 2;
        for fragment in [&rendered[..split], &rendered[split..]] {
            events.push(AssistantMessageEvent::ToolCallDelta {
                content_index: index,
                delta: fragment.into(),
                partial: partial.clone(),
            });
        }
        if let ContentBlock::ToolCall(call) = &mut partial.content[index] {
            call.arguments = arguments.clone();
        }
        events.push(AssistantMessageEvent::ToolCallEnd {
            content_index: index,
            tool_call: ToolCall::new(*id, *name, arguments.clone()),
            partial: partial.clone(),
        });
    }
    let mut message = partial;
    message.stop_reason = StopReason::ToolUse;
    message.usage = Usage {
        input: 20,
        output: 10,
        total_tokens: 30,
        ..Usage::default()
    };
    events.push(AssistantMessageEvent::Done {
        reason: StopReason::ToolUse,
        message,
    });
    events
}

/// Streams a terminal failure.
fn error_turn(error_message: &str) -> Vec<AssistantMessageEvent> {
    let mut message = AssistantMessage::partial(model(), 0);
    message.stop_reason = StopReason::Error;
    message.error_message = Some(error_message.into());
    vec![
        AssistantMessageEvent::Start {
            partial: AssistantMessage::partial(model(), 0),
        },
        AssistantMessageEvent::Error {
            reason: StopReason::Error,
            error: message,
        },
    ]
}

#[derive(JsonSchema, Deserialize)]
struct LsArgs {
    path: String,
}

struct LsTool {
    executed: Arc<Mutex<Vec<String>>>,
}

impl Tool for LsTool {
    type Arguments = LsArgs;

    fn name(&self) -> Cow<'static, str> {
        "ls".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "List directory entries".into()
    }

    async fn execute(
        &self,
        tool_call_id: &str,
        args: LsArgs,
        _cancel: CancelToken,
        _on_update: Option<&ToolUpdateFn>,
    ) -> strand_core::Result {
        self.executed.lock().unwrap().push(tool_call_id.to_string());
        let _ = args.path;
        Ok(ToolResult::text("a.txt\nb.txt"))
    }
}

fn agent_with_tools(provider: Arc<ScriptedProvider>, executed: Arc<Mutex<Vec<String>>>) -> Agent {
    let mut tools = Tools::new();
    tools.register(LsTool { executed });
    Agent::new(provider, tools, AgentConfig::default()).with_clock(StepClock::starting_at(1_000))
}

/// Checks the documented event ordering: `agent_start` first, `agent_end`
/// last, and every `message_*` and `tool_execution_*` event bracketed by a
/// `turn_start`/`turn_end` pair.
fn assert_ordered(events: &[AgentEvent]) {
    assert!(
        matches!(events.first(), Some(AgentEvent::AgentStart)),
        "trace must open with agent_start"
    );
    assert!(
        matches!(events.last(), Some(AgentEvent::AgentEnd { .. })),
        "trace must close with agent_end"
    );

    let mut in_turn = false;
    let mut ended = false;
    for event in events {
        assert!(!ended, "no events after agent_end");
        match event {
            AgentEvent::AgentStart => {}
            AgentEvent::AgentEnd { .. } => {
                assert!(!in_turn, "agent_end inside an open turn");
                ended = true;
            }
            AgentEvent::TurnStart => {
                assert!(!in_turn, "nested turn_start");
                in_turn = true;
            }
            AgentEvent::TurnEnd { .. } => {
                assert!(in_turn, "turn_end without turn_start");
                in_turn = false;
            }
            AgentEvent::ToolExecutionStart { .. }
            | AgentEvent::ToolExecutionUpdate { .. }
            | AgentEvent::ToolExecutionEnd { .. }
            | AgentEvent::MessageUpdate { .. }
            | AgentEvent::MessageStart { .. }
            | AgentEvent::MessageEnd { .. } => {
                assert!(in_turn, "{} outside a turn", event.kind());
            }
        }
    }
}

fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(AgentEvent::kind).collect()
}

#[tokio::test]
async fn simple_echo() {
    let provider = ScriptedProvider::new(vec![text_turn("Hello!")]);
    let mut agent = Agent::new(provider.clone(), Tools::new(), AgentConfig::default())
        .with_clock(StepClock::starting_at(0));

    let (sink, stream) = EventStream::<AgentEvent>::channel();
    let last = agent
        .run(vec![Message::user("hi", 0)], &sink, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(last.text(), "Hello!");
    assert_eq!(last.stop_reason, StopReason::Stop);

    let (events, new_messages) = stream.collect().await;
    assert_ordered(&events);
    assert_eq!(kinds(&events).iter().filter(|k| **k == "turn_start").count(), 1);

    let new_messages = new_messages.unwrap();
    assert_eq!(new_messages.len(), 2);
    assert_eq!(new_messages[0].role(), "user");
    assert_eq!(new_messages[1].role(), "assistant");

    // The provider saw the user prompt and an empty tool set.
    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tools.is_empty());
    assert_eq!(requests[0].messages.len(), 1);
}

#[tokio::test]
async fn single_tool_call() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[("call_ls", "ls", json!({"path": "."}))]),
        text_turn("Here they are: a.txt and b.txt"),
    ]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let mut agent = agent_with_tools(provider.clone(), executed.clone());

    let (sink, stream) = EventStream::<AgentEvent>::channel();
    let last = agent
        .run(
            vec![Message::user("list files", 0)],
            &sink,
            CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(last.stop_reason, StopReason::Stop);
    assert_eq!(executed.lock().unwrap().as_slice(), ["call_ls"]);

    // Context: user, assistant(tool call), tool result, assistant(text).
    let roles: Vec<&str> = agent.messages().iter().map(Message::role).collect();
    assert_eq!(roles, ["user", "assistant", "toolResult", "assistant"]);
    let result = agent.messages()[2].as_tool_result().unwrap();
    assert_eq!(result.tool_call_id, "call_ls");
    assert!(!result.is_error);
    assert_eq!(result.content[0].as_text(), Some("a.txt\nb.txt"));

    let (events, _) = stream.collect().await;
    assert_ordered(&events);
    let starts = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ToolExecutionStart { tool_call_id, .. } if tool_call_id == "call_ls"))
        .count();
    let ends = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ToolExecutionEnd { tool_call_id, .. } if tool_call_id == "call_ls"))
        .count();
    assert_eq!((starts, ends), (1, 1));

    // The second provider call saw the tool result in context.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 3);
}

#[tokio::test]
async fn steering_skips_remaining_tool_calls() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[
            ("call_a", "ls", json!({"path": "a"})),
            ("call_b", "ls", json!({"path": "b"})),
            ("call_c", "ls", json!({"path": "c"})),
        ]),
        text_turn("ok, doing X instead"),
    ]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let mut agent = agent_with_tools(provider.clone(), executed.clone());

    // Empty at run start and after call_a; delivers after call_b.
    let polls = Arc::new(Mutex::new(0usize));
    let steering: MessageSourceFn = Arc::new(move || {
        let polls = polls.clone();
        Box::pin(async move {
            let mut polls = polls.lock().unwrap();
            *polls += 1;
            if *polls == 3 {
                vec![Message::user("wait, do X", 50)]
            } else {
                Vec::new()
            }
        })
    });
    agent.set_message_sources(Some(steering), None);

    let (sink, stream) = EventStream::<AgentEvent>::channel();
    let last = agent
        .run(vec![Message::user("go", 0)], &sink, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(last.text(), "ok, doing X instead");

    // Only the first two calls ran.
    assert_eq!(executed.lock().unwrap().as_slice(), ["call_a", "call_b"]);

    // call_c got a synthetic error result.
    let skipped = agent
        .messages()
        .iter()
        .filter_map(Message::as_tool_result)
        .find(|r| r.tool_call_id == "call_c")
        .expect("skipped result for call_c");
    assert!(skipped.is_error);
    assert_eq!(
        skipped.content[0].as_text(),
        Some("Skipped due to queued user message.")
    );

    // The steering message entered the context before the second response.
    let position_steering = agent
        .messages()
        .iter()
        .position(|m| m.display_text() == "wait, do X")
        .unwrap();
    let position_reply = agent
        .messages()
        .iter()
        .position(|m| m.display_text() == "ok, doing X instead")
        .unwrap();
    assert!(position_steering < position_reply);

    let (events, _) = stream.collect().await;
    assert_ordered(&events);
    // Two turns: the tool turn and the steered reply.
    assert_eq!(kinds(&events).iter().filter(|k| **k == "turn_start").count(), 2);
}

#[tokio::test]
async fn follow_up_extends_the_run() {
    let provider = ScriptedProvider::new(vec![
        text_turn("first answer"),
        text_turn("follow-up answer"),
    ]);
    let mut agent = Agent::new(provider.clone(), Tools::new(), AgentConfig::default())
        .with_clock(StepClock::starting_at(0));
    agent.queue_follow_up(Message::user("and then?", 10));

    let (sink, stream) = EventStream::<AgentEvent>::channel();
    let last = agent
        .run(vec![Message::user("question", 0)], &sink, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(last.text(), "follow-up answer");

    let (events, new_messages) = stream.collect().await;
    assert_ordered(&events);
    // user, assistant, follow-up user, assistant.
    assert_eq!(new_messages.unwrap().len(), 4);
}

#[tokio::test]
async fn provider_error_terminates_the_run() {
    let provider = ScriptedProvider::new(vec![error_turn("upstream exploded")]);
    let mut agent = Agent::new(provider, Tools::new(), AgentConfig::default())
        .with_clock(StepClock::starting_at(0));

    let (sink, stream) = EventStream::<AgentEvent>::channel();
    let last = agent
        .run(vec![Message::user("hi", 0)], &sink, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(last.stop_reason, StopReason::Error);
    assert_eq!(last.error_message.as_deref(), Some("upstream exploded"));

    let (events, _) = stream.collect().await;
    assert_ordered(&events);
}

#[tokio::test]
async fn pre_cancelled_run_aborts_cleanly() {
    let provider = ScriptedProvider::new(vec![]);
    let mut agent = Agent::new(provider, Tools::new(), AgentConfig::default())
        .with_clock(StepClock::starting_at(0));

    let cancel = CancelToken::new();
    cancel.cancel();

    let (sink, stream) = EventStream::<AgentEvent>::channel();
    let last = agent
        .run(vec![Message::user("hi", 0)], &sink, cancel)
        .await
        .unwrap();
    assert_eq!(last.stop_reason, StopReason::Aborted);

    let (events, _) = stream.collect().await;
    assert_ordered(&events);
}

#[tokio::test]
async fn continue_requires_a_continuable_tail() {
    let provider = ScriptedProvider::new(vec![text_turn("answer")]);
    let mut agent = Agent::new(provider, Tools::new(), AgentConfig::default())
        .with_clock(StepClock::starting_at(0));

    let (sink, _stream) = EventStream::<AgentEvent>::channel();
    agent
        .run(vec![Message::user("q", 0)], &sink, CancelToken::new())
        .await
        .unwrap();

    let (sink2, _stream2) = EventStream::<AgentEvent>::channel();
    let err = agent
        .continue_run(&sink2, CancelToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid state"));
}

#[tokio::test]
async fn overflow_compacts_and_auto_continues() {
    let provider = ScriptedProvider::new(vec![
        // 1: a normal turn building some history.
        text_turn("first answer"),
        // 2: same-model context overflow.
        error_turn("prompt is too long: maximum context exceeded"),
        // 3: the compaction summary request.
        text_turn("## Goal\nKeep working on the thing."),
        // 4: the automatic continue.
        text_turn("recovered"),
    ]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let agent = agent_with_tools(provider.clone(), executed);

    let compaction = CompactionConfig {
        keep_recent_tokens: 1,
        ..CompactionConfig::default()
    };
    let mut session = AgentSession::new(agent, compaction).with_clock(StepClock::starting_at(0));

    let (sink1, _s1) = EventStream::<AgentEvent>::channel();
    session
        .prompt("start the work", &sink1, CancelToken::new())
        .await
        .unwrap();

    let (sink2, _s2) = EventStream::<AgentEvent>::channel();
    let recovered = session
        .prompt("try again", &sink2, CancelToken::new())
        .await
        .unwrap();

    // The run recovered without user intervention.
    assert_eq!(recovered.text(), "recovered");

    // A compaction entry landed in the log.
    assert!(session.log().last_compaction_index().is_some());

    // The working history was reloaded from the checkpoint: it opens with
    // the compaction summary and no longer contains the failing response.
    let first = &session.agent.messages()[0];
    assert_eq!(first.role(), "compaction-summary");
    assert!(first.display_text().contains("## Goal"));
    assert!(
        session
            .agent
            .messages()
            .iter()
            .all(|m| m.as_assistant().is_none_or(|a| a.stop_reason != StopReason::Error))
    );

    // All four scripted calls were consumed.
    assert_eq!(provider.requests().len(), 4);
}

#[tokio::test]
async fn threshold_compaction_splits_turn_and_reduces_tokens() {
    // The assistant reports near-window usage, tripping the threshold
    // trigger after the run.
    let mut heavy = text_turn("answer");
    if let Some(AssistantMessageEvent::Done { message, .. }) = heavy.last_mut() {
        message.usage.total_tokens = 90_000;
    }
    let provider = ScriptedProvider::new(vec![
        heavy,
        // History and turn-prefix summaries, requested concurrently but
        // polled in order.
        text_turn("History summary"),
        text_turn("Prefix summary"),
    ]);
    let agent = Agent::new(provider.clone(), Tools::new(), AgentConfig::default())
        .with_clock(StepClock::starting_at(0));

    let compaction = CompactionConfig {
        keep_recent_tokens: 1,
        ..CompactionConfig::default()
    };
    let mut session = AgentSession::new(agent, compaction).with_clock(StepClock::starting_at(0));

    let (sink, _stream) = EventStream::<AgentEvent>::channel();
    let big_prompt = "please analyze this ".repeat(400);
    let last = session
        .prompt(big_prompt, &sink, CancelToken::new())
        .await
        .unwrap();
    // Threshold compaction does not retry; the original answer stands.
    assert_eq!(last.text(), "answer");

    let index = session.log().last_compaction_index().expect("compaction entry");
    let strand_agent::SessionEntryKind::Compaction(entry) =
        &session.log().entries()[index].kind
    else {
        panic!("expected a compaction entry");
    };

    // The keep-recent budget cut inside the only turn, so the checkpoint
    // joins the history summary with the turn-prefix summary.
    assert!(entry.summary.starts_with("History summary"));
    assert!(entry.summary.contains("**Turn Context (split turn):**"));
    assert!(entry.summary.contains("Prefix summary"));

    // The reloaded context weighs less than what was summarized away.
    let after = strand_agent::compaction::estimate_messages_tokens(session.agent.messages());
    assert!(
        after < entry.tokens_before,
        "estimated {after} tokens, was {}",
        entry.tokens_before
    );
    assert_eq!(session.agent.messages()[0].role(), "compaction-summary");
}

#[tokio::test]
async fn partial_tool_arguments_grow_during_streaming() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[("call_ls", "ls", json!({"path": "/tmp/somewhere"}))]),
        text_turn("done"),
    ]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let mut agent = agent_with_tools(provider, executed);

    let (sink, stream) = EventStream::<AgentEvent>::channel();
    agent
        .run(vec![Message::user("go", 0)], &sink, CancelToken::new())
        .await
        .unwrap();
    let (events, _) = stream.collect().await;

    // Mid-stream snapshots carry a parsable (prefix) object for the call.
    let saw_partial_args = events.iter().any(|event| {
        let AgentEvent::MessageUpdate { message, assistant_message_event } = event else {
            return false;
        };
        if !matches!(
            **assistant_message_event,
            AssistantMessageEvent::ToolCallDelta { .. }
        ) {
            return false;
        }
        let Message::Assistant(assistant) = message else {
            return false;
        };
        assistant
            .tool_calls()
            .next()
            .is_some_and(|call| call.arguments.get("path").is_some())
    });
    assert!(saw_partial_args);
}
