//! The agent run loop.
//!
//! One run alternates between streaming an assistant response, executing the
//! tool calls it carries, and injecting queued user messages, until the model
//! stops requesting tools and no further input is queued. Two injection
//! boundaries exist with different priorities: *steering* messages are polled
//! after every tool result (and between turns) and preempt remaining tool
//! calls; *follow-up* messages are polled only when the run would otherwise
//! end.
//!
//! The loop owns the working context exclusively. UI consumers observe
//! immutable snapshots through [`AgentEvent`]s pushed into an
//! [`EventSink`]; tools receive only their arguments, the cancellation
//! token, and an update callback.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures_lite::StreamExt;
use serde_json::Value;
use strand_core::CancelToken;
use strand_core::llm::{
    AssistantMessage, AssistantMessageEvent, ContentBlock, Context, Message, StopReason, ToolCall,
    ToolResult, Tools,
};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AgentConfig;
use crate::event::AgentEvent;
use crate::partial_json;
use crate::queue::{MessageQueue, QueueMode};
use crate::stream::EventSink;
use crate::transform;
use crate::error::AgentError;

/// Text of the result synthesized for tool calls preempted by steering.
pub const SKIPPED_TEXT: &str = "Skipped due to queued user message.";

/// Async source of queued messages, polled at delivery boundaries.
pub type MessageSourceFn = Arc<dyn Fn() -> BoxFuture<'static, Vec<Message>> + Send + Sync>;

/// The agent runtime: provider, tools, working context, and scheduling.
pub struct Agent {
    provider: Arc<dyn strand_core::Provider>,
    tools: Tools,
    config: AgentConfig,
    messages: Vec<Message>,
    queue: MessageQueue,
    steering_source: Option<MessageSourceFn>,
    follow_up_source: Option<MessageSourceFn>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", self.provider.model())
            .field("tools", &self.tools)
            .field("messages", &self.messages.len())
            .finish()
    }
}

struct ToolPassOutcome {
    tool_results: Vec<Message>,
    steering: Option<Vec<Message>>,
}

impl Agent {
    /// Creates an agent over a provider and tool registry.
    #[must_use]
    pub fn new(provider: Arc<dyn strand_core::Provider>, tools: Tools, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
            messages: Vec::new(),
            queue: MessageQueue::default(),
            steering_source: None,
            follow_up_source: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source. Primarily for tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the working message history.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replaces the working message history (e.g. after compaction reload).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Appends a message without running.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Swaps the provider (model switching between runs).
    pub fn set_provider(&mut self, provider: Arc<dyn strand_core::Provider>) {
        self.provider = provider;
    }

    /// Returns the current provider.
    #[must_use]
    pub fn provider(&self) -> Arc<dyn strand_core::Provider> {
        Arc::clone(&self.provider)
    }

    /// Returns the agent configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Configures async sources polled for steering and follow-up messages.
    pub fn set_message_sources(
        &mut self,
        steering: Option<MessageSourceFn>,
        follow_up: Option<MessageSourceFn>,
    ) {
        self.steering_source = steering;
        self.follow_up_source = follow_up;
    }

    /// Sets queue delivery modes.
    pub fn set_queue_modes(&mut self, steering: QueueMode, follow_up: QueueMode) {
        self.queue.set_modes(steering, follow_up);
    }

    /// Queues a steering message, delivered after the current tool finishes.
    pub fn queue_steering(&mut self, message: Message) {
        self.queue.push_steering(message);
    }

    /// Queues a follow-up message, delivered when the run would otherwise
    /// stop.
    pub fn queue_follow_up(&mut self, message: Message) {
        self.queue.push_follow_up(message);
    }

    /// Number of queued steering plus follow-up messages.
    #[must_use]
    pub fn queued_messages(&self) -> usize {
        self.queue.pending()
    }

    /// Runs the agent with the given prompt messages.
    ///
    /// Events are pushed into `events` in the documented order; the final
    /// `agent_end` event carries every message the run produced and resolves
    /// the sink's stream result. Cancellation is requested through `cancel`
    /// and observed cooperatively.
    ///
    /// # Errors
    ///
    /// Returns an error only for contract violations and key-resolution
    /// failures; provider and tool failures surface as messages.
    pub async fn run(
        &mut self,
        prompts: Vec<Message>,
        events: &EventSink<AgentEvent>,
        cancel: CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        self.run_loop(prompts, events, cancel).await
    }

    /// Re-enters the scheduling loop without a new prompt.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidState`] unless the last message is a
    /// user message, a tool result, or a custom variant that converts to
    /// one.
    pub async fn continue_run(
        &mut self,
        events: &EventSink<AgentEvent>,
        cancel: CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        let convertible = match self.messages.last() {
            Some(Message::User(_) | Message::ToolResult(_)) => true,
            Some(Message::Custom(custom)) => (self.config.convert_to_llm)(custom)
                .last()
                .is_some_and(|m| matches!(m, Message::User(_) | Message::ToolResult(_))),
            _ => false,
        };
        if !convertible {
            return Err(AgentError::InvalidState(
                "continue requires the last message to be a user message or tool result".into(),
            ));
        }
        self.run_loop(Vec::new(), events, cancel).await
    }

    async fn run_loop(
        &mut self,
        prompts: Vec<Message>,
        events: &EventSink<AgentEvent>,
        cancel: CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        let mut new_messages: Vec<Message> = Vec::new();
        let mut last_assistant: Option<AssistantMessage> = None;
        let mut iterations = 0usize;

        events.push(AgentEvent::AgentStart);

        // Prompts are delivered through the pending path of the first turn,
        // so their message events land inside its turn_start/turn_end
        // bracket. Steering queued while idle rides along behind them.
        let mut pending = prompts;
        pending.extend(self.drain_steering().await);

        'outer: loop {
            let mut has_tool_calls = true;

            while has_tool_calls || !pending.is_empty() {
                events.push(AgentEvent::TurnStart);

                for message in std::mem::take(&mut pending) {
                    self.messages.push(message.clone());
                    new_messages.push(message.clone());
                    events.push(AgentEvent::MessageStart {
                        message: message.clone(),
                    });
                    events.push(AgentEvent::MessageEnd { message });
                }

                if cancel.is_cancelled() {
                    let aborted = self.finish_aborted(last_assistant.take(), events);
                    events.push(AgentEvent::TurnEnd {
                        message: Box::new(Message::Assistant(aborted.clone())),
                        tool_results: Vec::new(),
                    });
                    events.push(AgentEvent::AgentEnd {
                        messages: {
                            new_messages.push(Message::Assistant(aborted.clone()));
                            new_messages.clone()
                        },
                    });
                    return Ok(aborted);
                }

                let assistant = self.stream_assistant_response(events, &cancel).await?;
                last_assistant = Some(assistant.clone());
                new_messages.push(Message::Assistant(assistant.clone()));

                if assistant.stop_reason.is_failure() {
                    events.push(AgentEvent::TurnEnd {
                        message: Box::new(Message::Assistant(assistant.clone())),
                        tool_results: Vec::new(),
                    });
                    events.push(AgentEvent::AgentEnd {
                        messages: new_messages,
                    });
                    return Ok(assistant);
                }

                let tool_calls: Vec<ToolCall> = assistant.tool_calls().cloned().collect();
                has_tool_calls = !tool_calls.is_empty();

                let mut steering_after_tools = None;
                let mut tool_results = Vec::new();
                if has_tool_calls {
                    iterations += 1;
                    if iterations > self.config.max_tool_iterations {
                        let stopped = self.finish_iteration_cap(&assistant);
                        events.push(AgentEvent::TurnEnd {
                            message: Box::new(Message::Assistant(assistant.clone())),
                            tool_results: Vec::new(),
                        });
                        events.push(AgentEvent::AgentEnd {
                            messages: new_messages,
                        });
                        return Ok(stopped);
                    }

                    let outcome = self
                        .execute_tool_calls(&tool_calls, events, &mut new_messages, &cancel)
                        .await;
                    tool_results = outcome.tool_results;
                    steering_after_tools = outcome.steering;
                }

                events.push(AgentEvent::TurnEnd {
                    message: Box::new(Message::Assistant(assistant)),
                    tool_results,
                });

                if let Some(steering) = steering_after_tools {
                    pending = steering;
                } else {
                    // Delivery boundary: between turns.
                    pending = self.drain_steering().await;
                }
            }

            // Delivery boundary: the run would otherwise stop.
            let follow_up = self.drain_follow_up().await;
            if follow_up.is_empty() {
                break 'outer;
            }
            pending = follow_up;
        }

        let Some(final_message) = last_assistant else {
            return Err(AgentError::InvalidState(
                "run completed without an assistant response".into(),
            ));
        };
        events.push(AgentEvent::AgentEnd {
            messages: new_messages,
        });
        Ok(final_message)
    }

    /// Streams one assistant response, folding provider events into a single
    /// growing partial message that always sits at the tail of the context.
    async fn stream_assistant_response(
        &mut self,
        events: &EventSink<AgentEvent>,
        cancel: &CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        let mut visible = self.messages.clone();
        if let Some(transform_context) = &self.config.transform_context {
            visible = transform_context(visible, cancel.clone()).await?;
        }

        let normalizer = transform::sequential_id_normalizer();
        let llm_messages = transform::to_model_context(
            &visible,
            self.provider.model(),
            &self.config.convert_to_llm,
            Some(&normalizer),
            self.clock.now_ms(),
        );

        let mut options = self.config.stream_options.clone();
        options.signal = cancel.clone();
        options.reasoning = options.reasoning.clamp(self.provider.supports_xhigh());
        if let Some(get_api_key) = &self.config.get_api_key {
            let key = get_api_key(self.provider.model().provider.clone())
                .await
                .map_err(|e| AgentError::Auth(e.to_string()))?;
            options.api_key = Some(key);
        }

        let context = Context {
            system_prompt: self.config.system_prompt.clone(),
            tools: self.tools.definitions(),
            messages: llm_messages,
        };

        let provider = Arc::clone(&self.provider);
        let mut stream = provider.stream(&context, &options);

        let mut added_partial = false;
        // Concatenated argument fragments per streaming tool call, re-parsed
        // after each delta so partial arguments stay renderable.
        let mut fragments: HashMap<usize, String> = HashMap::new();

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() && !event.is_terminal() {
                let aborted = self.abort_message(self.partial_snapshot(added_partial));
                events.push(AgentEvent::MessageUpdate {
                    message: Message::Assistant(aborted.clone()),
                    assistant_message_event: Box::new(AssistantMessageEvent::Error {
                        reason: StopReason::Aborted,
                        error: aborted.clone(),
                    }),
                });
                return Ok(self.finalize_assistant(aborted, events, added_partial));
            }

            match event {
                AssistantMessageEvent::Done { message, .. } => {
                    return Ok(self.finalize_assistant(message, events, added_partial));
                }
                AssistantMessageEvent::Error { error, .. } => {
                    return Ok(self.finalize_assistant(error, events, added_partial));
                }
                mut event => {
                    if let AssistantMessageEvent::ToolCallDelta {
                        content_index,
                        delta,
                        partial,
                    } = &mut event
                    {
                        let buffer = fragments.entry(*content_index).or_default();
                        buffer.push_str(delta);
                        if let Some(arguments) = partial_json::parse_partial(buffer) {
                            patch_tool_call_args(partial, *content_index, arguments);
                        }
                    }
                    if let AssistantMessageEvent::ToolCallEnd { content_index, .. } = &event {
                        fragments.remove(content_index);
                    }

                    let Some(snapshot) = event.partial().cloned() else {
                        continue;
                    };
                    let started_now = self.update_partial(snapshot.clone(), &mut added_partial);
                    if started_now {
                        events.push(AgentEvent::MessageStart {
                            message: Message::Assistant(snapshot.clone()),
                        });
                    }
                    events.push(AgentEvent::MessageUpdate {
                        message: Message::Assistant(snapshot),
                        assistant_message_event: Box::new(event),
                    });
                }
            }
        }

        Err(AgentError::Llm(
            "stream ended without a terminal event".into(),
        ))
    }

    /// Replaces the tail partial, or appends it the first time. Returns
    /// `true` when the partial entered the context just now.
    fn update_partial(&mut self, partial: AssistantMessage, added: &mut bool) -> bool {
        if *added {
            if let Some(last) = self.messages.last_mut() {
                *last = Message::Assistant(partial);
            }
            false
        } else {
            self.messages.push(Message::Assistant(partial));
            *added = true;
            true
        }
    }

    fn partial_snapshot(&self, added: bool) -> Option<AssistantMessage> {
        if !added {
            return None;
        }
        match self.messages.last() {
            Some(Message::Assistant(a)) => Some(a.clone()),
            _ => None,
        }
    }

    fn finalize_assistant(
        &mut self,
        message: AssistantMessage,
        events: &EventSink<AgentEvent>,
        added_partial: bool,
    ) -> AssistantMessage {
        if added_partial {
            if let Some(last) = self.messages.last_mut() {
                *last = Message::Assistant(message.clone());
            }
        } else {
            self.messages.push(Message::Assistant(message.clone()));
            events.push(AgentEvent::MessageStart {
                message: Message::Assistant(message.clone()),
            });
        }
        events.push(AgentEvent::MessageEnd {
            message: Message::Assistant(message.clone()),
        });
        message
    }

    fn abort_message(&self, partial: Option<AssistantMessage>) -> AssistantMessage {
        let mut message = partial.unwrap_or_else(|| {
            AssistantMessage::partial(self.provider.model().clone(), self.clock.now_ms())
        });
        message.stop_reason = StopReason::Aborted;
        message.error_message = Some("Aborted".into());
        message.timestamp = self.clock.now_ms();
        message
    }

    /// Terminates an aborted run: records the abort message in the context
    /// and emits its message events.
    fn finish_aborted(
        &mut self,
        last: Option<AssistantMessage>,
        events: &EventSink<AgentEvent>,
    ) -> AssistantMessage {
        let aborted = self.abort_message(last);
        let message = Message::Assistant(aborted.clone());
        self.messages.push(message.clone());
        events.push(AgentEvent::MessageStart {
            message: message.clone(),
        });
        events.push(AgentEvent::MessageEnd { message });
        aborted
    }

    fn finish_iteration_cap(&mut self, assistant: &AssistantMessage) -> AssistantMessage {
        let limit = self.config.max_tool_iterations;
        warn!(limit, "tool iteration cap reached, stopping run");
        let mut stopped = assistant.clone();
        stopped.stop_reason = StopReason::Error;
        stopped.error_message = Some(format!("Maximum tool iterations ({limit}) exceeded"));
        stopped
    }

    async fn execute_tool_calls(
        &mut self,
        tool_calls: &[ToolCall],
        events: &EventSink<AgentEvent>,
        new_messages: &mut Vec<Message>,
        cancel: &CancelToken,
    ) -> ToolPassOutcome {
        let mut tool_results = Vec::new();
        let mut steering = None;

        for (index, call) in tool_calls.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            events.push(AgentEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.arguments.clone(),
            });

            let (result, is_error) = self.execute_one(call, events, cancel).await;

            // Final update so UIs render output even from tools that never
            // stream intermediate snapshots.
            events.push(AgentEvent::ToolExecutionUpdate {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.arguments.clone(),
                partial_result: result.clone(),
            });
            events.push(AgentEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: result.clone(),
                is_error,
            });

            let message = Message::ToolResult(strand_core::llm::ToolResultMessage {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: result.content,
                is_error,
                details: result.details,
                timestamp: self.clock.now_ms(),
            });
            self.messages.push(message.clone());
            new_messages.push(message.clone());
            events.push(AgentEvent::MessageStart {
                message: message.clone(),
            });
            events.push(AgentEvent::MessageEnd {
                message: message.clone(),
            });
            tool_results.push(message);

            if cancel.is_cancelled() {
                break;
            }

            // Delivery boundary: after each tool result. Queued user input
            // preempts the remaining calls of this assistant message.
            let queued = self.drain_steering().await;
            if !queued.is_empty() {
                for skipped in &tool_calls[index + 1..] {
                    tool_results.push(self.skip_tool_call(skipped, events, new_messages));
                }
                steering = Some(queued);
                break;
            }
        }

        ToolPassOutcome {
            tool_results,
            steering,
        }
    }

    async fn execute_one(
        &self,
        call: &ToolCall,
        events: &EventSink<AgentEvent>,
        cancel: &CancelToken,
    ) -> (ToolResult, bool) {
        let sink = events.clone();
        let tool_call_id = call.id.clone();
        let tool_name = call.name.clone();
        let args = call.arguments.clone();
        let on_update = move |partial_result: ToolResult| {
            sink.push(AgentEvent::ToolExecutionUpdate {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
                partial_result,
            });
        };

        let started = std::time::Instant::now();
        let outcome = self
            .tools
            .execute(
                &call.name,
                &call.id,
                call.arguments.clone(),
                cancel.clone(),
                Some(&on_update),
            )
            .await;
        match outcome {
            Ok(result) => {
                debug!(tool = %call.name, elapsed_ms = started.elapsed().as_millis() as u64, "tool finished");
                (result, false)
            }
            Err(error) => {
                warn!(tool = %call.name, %error, "tool failed");
                (ToolResult::text(format!("Error: {error}")), true)
            }
        }
    }

    fn skip_tool_call(
        &mut self,
        call: &ToolCall,
        events: &EventSink<AgentEvent>,
        new_messages: &mut Vec<Message>,
    ) -> Message {
        let result = ToolResult::text(SKIPPED_TEXT);
        events.push(AgentEvent::ToolExecutionStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: call.arguments.clone(),
        });
        events.push(AgentEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: result.clone(),
            is_error: true,
        });

        let message = Message::ToolResult(strand_core::llm::ToolResultMessage {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: result.content,
            is_error: true,
            details: None,
            timestamp: self.clock.now_ms(),
        });
        self.messages.push(message.clone());
        new_messages.push(message.clone());
        events.push(AgentEvent::MessageStart {
            message: message.clone(),
        });
        events.push(AgentEvent::MessageEnd {
            message: message.clone(),
        });
        message
    }

    async fn drain_steering(&mut self) -> Vec<Message> {
        let mut messages = self.queue.pop_steering();
        if let Some(source) = &self.steering_source {
            messages.extend(source().await);
        }
        messages
    }

    async fn drain_follow_up(&mut self) -> Vec<Message> {
        let mut messages = self.queue.pop_follow_up();
        if let Some(source) = &self.follow_up_source {
            messages.extend(source().await);
        }
        messages
    }
}

fn patch_tool_call_args(partial: &mut AssistantMessage, content_index: usize, arguments: Value) {
    if let Some(ContentBlock::ToolCall(call)) = partial.content.get_mut(content_index) {
        call.arguments = arguments;
    }
}
