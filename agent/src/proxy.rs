//! Bandwidth-lean event transport.
//!
//! Direct [`AssistantMessageEvent`]s carry the full partial-message snapshot
//! on every delta, which is wasteful over a network hop. The proxy codec
//! strips `partial` on the server side and reconstructs it on the client:
//! `*_start` events open content blocks by index, `*_delta` events append,
//! and tool-call argument fragments re-run the fault-tolerant JSON parser so
//! partial arguments stay renderable. `done` carries only usage; the client
//! substitutes its locally assembled message as the final one.
//!
//! The codec is stateless across streams and deterministic: for a
//! conformant event sequence, `strip` then [`ProxyRebuilder::apply`]
//! reproduces the original content, stop reason, and usage exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::llm::{
    AssistantMessage, AssistantMessageEvent, ContentBlock, ModelRef, StopReason, TextContent,
    ThinkingContent, ToolCall, Usage,
};

use crate::partial_json;

/// An assistant stream event without `partial` snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProxyAssistantMessageEvent {
    /// Response opened.
    Start,
    /// A text block opened.
    TextStart {
        /// Block index.
        content_index: usize,
    },
    /// Text appended.
    TextDelta {
        /// Block index.
        content_index: usize,
        /// Appended fragment.
        delta: String,
    },
    /// Text block complete.
    TextEnd {
        /// Block index.
        content_index: usize,
        /// Provider-opaque signature, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        content_signature: Option<String>,
    },
    /// A thinking block opened.
    ThinkingStart {
        /// Block index.
        content_index: usize,
    },
    /// Reasoning appended.
    ThinkingDelta {
        /// Block index.
        content_index: usize,
        /// Appended fragment.
        delta: String,
    },
    /// Thinking block complete.
    ThinkingEnd {
        /// Block index.
        content_index: usize,
        /// Provider-opaque signature, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        content_signature: Option<String>,
    },
    /// A tool call opened. Carries id and name because the client has no
    /// partial to introspect.
    ToolCallStart {
        /// Block index.
        content_index: usize,
        /// Tool call id.
        id: String,
        /// Tool name.
        tool_name: String,
    },
    /// A JSON argument fragment.
    ToolCallDelta {
        /// Block index.
        content_index: usize,
        /// Appended fragment.
        delta: String,
    },
    /// Tool call complete; the client finalizes arguments from its
    /// accumulated fragments.
    ToolCallEnd {
        /// Block index.
        content_index: usize,
    },
    /// Terminal success; the client substitutes its assembled message.
    Done {
        /// `Stop`, `Length`, or `ToolUse`.
        reason: StopReason,
        /// Final usage.
        usage: Usage,
    },
    /// Terminal failure or abort.
    Error {
        /// `Aborted` or `Error`.
        reason: StopReason,
        /// Final usage.
        usage: Usage,
        /// Failure description.
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

/// Server side: strips `partial` from a direct event.
#[must_use]
pub fn strip(event: &AssistantMessageEvent) -> ProxyAssistantMessageEvent {
    match event {
        AssistantMessageEvent::Start { .. } => ProxyAssistantMessageEvent::Start,
        AssistantMessageEvent::TextStart { content_index, .. } => {
            ProxyAssistantMessageEvent::TextStart {
                content_index: *content_index,
            }
        }
        AssistantMessageEvent::TextDelta {
            content_index,
            delta,
            ..
        } => ProxyAssistantMessageEvent::TextDelta {
            content_index: *content_index,
            delta: delta.clone(),
        },
        AssistantMessageEvent::TextEnd {
            content_index,
            partial,
            ..
        } => ProxyAssistantMessageEvent::TextEnd {
            content_index: *content_index,
            content_signature: match partial.content.get(*content_index) {
                Some(ContentBlock::Text(text)) => text.signature.clone(),
                _ => None,
            },
        },
        AssistantMessageEvent::ThinkingStart { content_index, .. } => {
            ProxyAssistantMessageEvent::ThinkingStart {
                content_index: *content_index,
            }
        }
        AssistantMessageEvent::ThinkingDelta {
            content_index,
            delta,
            ..
        } => ProxyAssistantMessageEvent::ThinkingDelta {
            content_index: *content_index,
            delta: delta.clone(),
        },
        AssistantMessageEvent::ThinkingEnd {
            content_index,
            thinking,
            ..
        } => ProxyAssistantMessageEvent::ThinkingEnd {
            content_index: *content_index,
            content_signature: thinking.signature.clone(),
        },
        AssistantMessageEvent::ToolCallStart {
            content_index,
            partial,
        } => {
            let (id, tool_name) = match partial.content.get(*content_index) {
                Some(ContentBlock::ToolCall(call)) => (call.id.clone(), call.name.clone()),
                _ => (String::new(), String::new()),
            };
            ProxyAssistantMessageEvent::ToolCallStart {
                content_index: *content_index,
                id,
                tool_name,
            }
        }
        AssistantMessageEvent::ToolCallDelta {
            content_index,
            delta,
            ..
        } => ProxyAssistantMessageEvent::ToolCallDelta {
            content_index: *content_index,
            delta: delta.clone(),
        },
        AssistantMessageEvent::ToolCallEnd { content_index, .. } => {
            ProxyAssistantMessageEvent::ToolCallEnd {
                content_index: *content_index,
            }
        }
        AssistantMessageEvent::Done { reason, message } => ProxyAssistantMessageEvent::Done {
            reason: *reason,
            usage: message.usage.clone(),
        },
        AssistantMessageEvent::Error { reason, error } => ProxyAssistantMessageEvent::Error {
            reason: *reason,
            usage: error.usage.clone(),
            error_message: error.error_message.clone(),
        },
    }
}

/// Client side: reconstructs a running partial message from proxy events.
///
/// One rebuilder serves one stream; it is constructed with the model
/// identity and timestamp the shell message should carry.
#[derive(Debug)]
pub struct ProxyRebuilder {
    partial: AssistantMessage,
    fragments: BTreeMap<usize, String>,
}

impl ProxyRebuilder {
    /// Creates a rebuilder for one stream.
    #[must_use]
    pub fn new(model: ModelRef, timestamp: i64) -> Self {
        Self {
            partial: AssistantMessage::partial(model, timestamp),
            fragments: BTreeMap::new(),
        }
    }

    /// Returns the current partial message.
    #[must_use]
    pub const fn partial(&self) -> &AssistantMessage {
        &self.partial
    }

    /// Applies one proxy event, returning the equivalent direct event with
    /// the reconstructed `partial` attached.
    pub fn apply(&mut self, event: ProxyAssistantMessageEvent) -> AssistantMessageEvent {
        match event {
            ProxyAssistantMessageEvent::Start => AssistantMessageEvent::Start {
                partial: self.snapshot(),
            },
            ProxyAssistantMessageEvent::TextStart { content_index } => {
                self.ensure_block(content_index, ContentBlock::Text(TextContent::default()));
                AssistantMessageEvent::TextStart {
                    content_index,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::TextDelta {
                content_index,
                delta,
            } => {
                if let Some(ContentBlock::Text(text)) = self.partial.content.get_mut(content_index)
                {
                    text.text.push_str(&delta);
                }
                AssistantMessageEvent::TextDelta {
                    content_index,
                    delta,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::TextEnd {
                content_index,
                content_signature,
            } => {
                let mut content = String::new();
                if let Some(ContentBlock::Text(text)) = self.partial.content.get_mut(content_index)
                {
                    text.signature = content_signature;
                    content = text.text.clone();
                }
                AssistantMessageEvent::TextEnd {
                    content_index,
                    content,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::ThinkingStart { content_index } => {
                self.ensure_block(
                    content_index,
                    ContentBlock::Thinking(ThinkingContent::default()),
                );
                AssistantMessageEvent::ThinkingStart {
                    content_index,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::ThinkingDelta {
                content_index,
                delta,
            } => {
                if let Some(ContentBlock::Thinking(thinking)) =
                    self.partial.content.get_mut(content_index)
                {
                    thinking.thinking.push_str(&delta);
                }
                AssistantMessageEvent::ThinkingDelta {
                    content_index,
                    delta,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::ThinkingEnd {
                content_index,
                content_signature,
            } => {
                let mut block = ThinkingContent::default();
                if let Some(ContentBlock::Thinking(thinking)) =
                    self.partial.content.get_mut(content_index)
                {
                    thinking.signature = content_signature;
                    block = thinking.clone();
                }
                AssistantMessageEvent::ThinkingEnd {
                    content_index,
                    thinking: block,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::ToolCallStart {
                content_index,
                id,
                tool_name,
            } => {
                self.ensure_block(
                    content_index,
                    ContentBlock::ToolCall(ToolCall::new(id, tool_name, Value::Object(
                        serde_json::Map::new(),
                    ))),
                );
                AssistantMessageEvent::ToolCallStart {
                    content_index,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                let buffer = self.fragments.entry(content_index).or_default();
                buffer.push_str(&delta);
                if let Some(arguments) = partial_json::parse_partial(buffer) {
                    if let Some(ContentBlock::ToolCall(call)) =
                        self.partial.content.get_mut(content_index)
                    {
                        call.arguments = arguments;
                    }
                }
                AssistantMessageEvent::ToolCallDelta {
                    content_index,
                    delta,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::ToolCallEnd { content_index } => {
                if let Some(buffer) = self.fragments.remove(&content_index) {
                    if let Some(arguments) = partial_json::parse_partial(&buffer) {
                        if let Some(ContentBlock::ToolCall(call)) =
                            self.partial.content.get_mut(content_index)
                        {
                            call.arguments = arguments;
                        }
                    }
                }
                let tool_call = match self.partial.content.get(content_index) {
                    Some(ContentBlock::ToolCall(call)) => call.clone(),
                    _ => ToolCall::new("", "", Value::Null),
                };
                AssistantMessageEvent::ToolCallEnd {
                    content_index,
                    tool_call,
                    partial: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::Done { reason, usage } => {
                self.partial.stop_reason = reason;
                self.partial.usage = usage;
                AssistantMessageEvent::Done {
                    reason,
                    message: self.snapshot(),
                }
            }
            ProxyAssistantMessageEvent::Error {
                reason,
                usage,
                error_message,
            } => {
                self.partial.stop_reason = reason;
                self.partial.usage = usage;
                self.partial.error_message = error_message;
                AssistantMessageEvent::Error {
                    reason,
                    error: self.snapshot(),
                }
            }
        }
    }

    fn ensure_block(&mut self, index: usize, block: ContentBlock) {
        while self.partial.content.len() <= index {
            self.partial.content.push(block.clone());
        }
    }

    fn snapshot(&self) -> AssistantMessage {
        self.partial.clone()
    }
}
