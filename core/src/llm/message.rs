//! Message types for agent conversations.
//!
//! Messages are represented as a tagged enum with variants for the three
//! model-facing roles (user, assistant, tool result) plus a caller-defined
//! `custom` role. Custom messages are visible to UIs and session logs but
//! must be mapped to model-facing messages by a caller-supplied converter
//! before any provider call; variants the converter maps to nothing are
//! dropped from model context.

use core::fmt::Debug;

use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};
use serde_json::Value;

/// Identity of a concrete model behind a provider.
///
/// Compared field-wise by [`ModelRef::same_model`] when deciding whether an
/// assistant message is being replayed to the model that produced it.
/// Signatures on content blocks are provider-private and only survive
/// same-model replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ModelRef {
    /// Provider name, e.g. `anthropic`.
    pub provider: String,
    /// Wire API family, e.g. `anthropic-messages`.
    pub api: String,
    /// Concrete model identifier, e.g. `claude-sonnet-4`.
    pub model_id: String,
}

impl ModelRef {
    /// Creates a model reference.
    pub fn new(
        provider: impl Into<String>,
        api: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            api: api.into(),
            model_id: model_id.into(),
        }
    }

    /// Returns `true` if both references name the same model.
    #[must_use]
    pub fn same_model(&self, other: &Self) -> bool {
        self.provider == other.provider && self.api == other.api && self.model_id == other.model_id
    }
}

/// Why an assistant response stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum StopReason {
    /// Natural end of turn.
    Stop,
    /// Output token budget exhausted.
    Length,
    /// The model requested tool execution.
    ToolUse,
    /// Cancellation was observed mid-stream.
    Aborted,
    /// The provider stream failed.
    Error,
}

impl StopReason {
    /// Returns `true` for reasons that must never be replayed to a model.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Aborted | Self::Error)
    }
}

/// Dollar cost breakdown for a response.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cost {
    /// Cost of prompt tokens.
    pub input: f64,
    /// Cost of completion tokens.
    pub output: f64,
    /// Cost of cache reads.
    pub cache_read: f64,
    /// Cost of cache writes.
    pub cache_write: f64,
    /// Total cost.
    pub total: f64,
}

/// Token usage recorded on an assistant message.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Usage {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
    /// Tokens read from the provider prompt cache.
    pub cache_read: u64,
    /// Tokens written to the provider prompt cache.
    pub cache_write: u64,
    /// Provider-reported total. Authoritative when positive.
    pub total_tokens: u64,
    /// Dollar cost breakdown.
    pub cost: Cost,
}

impl Usage {
    /// Total tokens occupied by the context that produced this response.
    ///
    /// Uses the provider-reported total when positive, otherwise the sum of
    /// the individual components.
    #[must_use]
    pub fn context_tokens(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.input + self.output + self.cache_read + self.cache_write
        }
    }
}

/// A text block.
///
/// The optional signature is provider-opaque and survives only same-model
/// replay.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextContent {
    /// Raw text.
    pub text: String,
    /// Provider-opaque signature, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub signature: Option<String>,
}

impl TextContent {
    /// Creates a plain text block.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            signature: None,
        }
    }
}

/// A reasoning block emitted by thinking-capable models.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThinkingContent {
    /// Reasoning text.
    pub thinking: String,
    /// Provider-opaque signature, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub signature: Option<String>,
}

impl ThinkingContent {
    /// Creates a reasoning block without a signature.
    pub fn new(thinking: impl Into<String>) -> Self {
        Self {
            thinking: thinking.into(),
            signature: None,
        }
    }
}

/// A request from the model to execute a tool.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ToolCall {
    /// Unique identifier correlating the call with its result.
    pub id: String,
    /// Name of the tool to execute.
    pub name: String,
    /// Arguments as an arbitrary JSON object.
    pub arguments: Value,
    /// Provider-opaque reasoning signature, stripped on cross-model replay.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub thought_signature: Option<String>,
}

impl ToolCall {
    /// Creates a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            thought_signature: None,
        }
    }
}

/// An inline image, base64-encoded.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ImageContent {
    /// Base64 payload.
    pub data: String,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
}

/// One block of message content.
///
/// User and tool-result content carries text and image blocks; assistant
/// content carries text, thinking, and tool-call blocks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "camelCase"))]
pub enum ContentBlock {
    /// Visible text.
    Text(TextContent),
    /// Model reasoning.
    Thinking(ThinkingContent),
    /// Tool invocation request.
    ToolCall(ToolCall),
    /// Inline image.
    Image(ImageContent),
}

impl ContentBlock {
    /// Creates a plain text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent::new(text))
    }

    /// Returns the text if this is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(&t.text),
            _ => None,
        }
    }

    /// Returns the tool call if this is a tool-call block.
    #[must_use]
    pub const fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// A user message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserMessage {
    /// Ordered text and image blocks.
    pub content: Vec<ContentBlock>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// An assistant message, possibly partial while a response is streaming.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AssistantMessage {
    /// Ordered text, thinking, and tool-call blocks.
    pub content: Vec<ContentBlock>,
    /// Why the response stopped.
    pub stop_reason: StopReason,
    /// Identity of the model that produced the message.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub model: ModelRef,
    /// Token usage for the response.
    pub usage: Usage,
    /// Human-readable failure description when `stop_reason` is a failure.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub error_message: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl AssistantMessage {
    /// Creates an empty partial message for the given model.
    #[must_use]
    pub fn partial(model: ModelRef, timestamp: i64) -> Self {
        Self {
            content: Vec::new(),
            stop_reason: StopReason::Stop,
            model,
            usage: Usage::default(),
            error_message: None,
            timestamp,
        }
    }

    /// Returns all tool calls in content order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(ContentBlock::as_tool_call)
    }

    /// Returns the concatenated text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text(t) = block {
                out.push_str(&t.text);
            }
        }
        out
    }
}

/// A tool result message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ToolResultMessage {
    /// Id of the tool call this responds to.
    pub tool_call_id: String,
    /// Name of the tool that ran.
    pub tool_name: String,
    /// Ordered text and image blocks.
    pub content: Vec<ContentBlock>,
    /// `true` for failures, including synthesized skip/orphan results.
    pub is_error: bool,
    /// Opaque tool-specific payload, not sent to models.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub details: Option<Value>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// A caller-defined message kind.
///
/// Well-known kinds used by this workspace: `bash-execution`,
/// `branch-summary`, `compaction-summary`. The set is open; any embedder may
/// register further kinds as long as it supplies a converter for them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CustomMessage {
    /// Discriminator, e.g. `compaction-summary`.
    pub kind: String,
    /// Text payload.
    pub content: String,
    /// Opaque structured payload for UIs.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub details: Option<Value>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "role", rename_all = "camelCase"))]
pub enum Message {
    /// Input from the user.
    User(UserMessage),
    /// A model response.
    Assistant(AssistantMessage),
    /// Output of one tool call.
    ToolResult(ToolResultMessage),
    /// Caller-defined variant, mapped before any model call.
    Custom(CustomMessage),
}

impl Message {
    /// Creates a user message with a single text block.
    pub fn user(text: impl Into<String>, timestamp: i64) -> Self {
        Self::User(UserMessage {
            content: vec![ContentBlock::text(text)],
            timestamp,
        })
    }

    /// Creates a user message from content blocks.
    #[must_use]
    pub fn user_blocks(content: Vec<ContentBlock>, timestamp: i64) -> Self {
        Self::User(UserMessage { content, timestamp })
    }

    /// Creates a tool result with a single text block.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
        timestamp: i64,
    ) -> Self {
        Self::ToolResult(ToolResultMessage {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![ContentBlock::text(text)],
            is_error,
            details: None,
            timestamp,
        })
    }

    /// Creates a custom message.
    pub fn custom(kind: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self::Custom(CustomMessage {
            kind: kind.into(),
            content: content.into(),
            details: None,
            timestamp,
        })
    }

    /// Returns the role discriminator as a string.
    #[must_use]
    pub fn role(&self) -> &str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::ToolResult(_) => "toolResult",
            Self::Custom(custom) => &custom.kind,
        }
    }

    /// Returns the creation timestamp in Unix milliseconds.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::User(m) => m.timestamp,
            Self::Assistant(m) => m.timestamp,
            Self::ToolResult(m) => m.timestamp,
            Self::Custom(m) => m.timestamp,
        }
    }

    /// Returns the assistant payload if this is an assistant message.
    #[must_use]
    pub const fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the tool-result payload if this is a tool result.
    #[must_use]
    pub const fn as_tool_result(&self) -> Option<&ToolResultMessage> {
        match self {
            Self::ToolResult(m) => Some(m),
            _ => None,
        }
    }

    /// Returns a plain-text rendering of the message content.
    ///
    /// Images render as a placeholder marker; tool calls as `name(args)`.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::User(m) => blocks_text(&m.content),
            Self::Assistant(m) => blocks_text(&m.content),
            Self::ToolResult(m) => blocks_text(&m.content),
            Self::Custom(m) => m.content.clone(),
        }
    }
}

fn blocks_text(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        if !out.is_empty() {
            out.push('\n');
        }
        match block {
            ContentBlock::Text(t) => out.push_str(&t.text),
            ContentBlock::Thinking(t) => out.push_str(&t.thinking),
            ContentBlock::ToolCall(call) => {
                out.push_str(&call.name);
                out.push('(');
                out.push_str(&call.arguments.to_string());
                out.push(')');
            }
            ContentBlock::Image(_) => out.push_str("[image]"),
        }
    }
    out
}
