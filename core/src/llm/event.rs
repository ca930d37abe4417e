//! Provider-normalized streaming events.
//!
//! Every provider adapter folds its wire protocol into the
//! [`AssistantMessageEvent`] shape. Each non-terminal event carries `partial`,
//! the full assistant-message snapshot accumulated so far, so consumers never
//! need provider-specific assembly logic. The bandwidth-optimized transport
//! that strips `partial` lives in the agent crate's proxy codec.

use alloc::string::String;

use super::message::{AssistantMessage, StopReason, ThinkingContent, ToolCall};

/// One event in a streaming assistant response.
///
/// Event order within a response follows the provider: `Start`, then
/// interleaved `*Start`/`*Delta`/`*End` triples per content block (indexed by
/// `content_index`), then exactly one terminal `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")
)]
pub enum AssistantMessageEvent {
    /// Response opened; `partial` is the empty message shell.
    Start {
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// A text block opened at `content_index`.
    TextStart {
        /// Index of the block within the message content.
        content_index: usize,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// Text appended to the block at `content_index`.
    TextDelta {
        /// Index of the block within the message content.
        content_index: usize,
        /// The appended fragment.
        delta: String,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// The text block at `content_index` is complete.
    TextEnd {
        /// Index of the block within the message content.
        content_index: usize,
        /// Final block text.
        content: String,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// A thinking block opened at `content_index`.
    ThinkingStart {
        /// Index of the block within the message content.
        content_index: usize,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// Reasoning text appended to the block at `content_index`.
    ThinkingDelta {
        /// Index of the block within the message content.
        content_index: usize,
        /// The appended fragment.
        delta: String,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// The thinking block at `content_index` is complete.
    ThinkingEnd {
        /// Index of the block within the message content.
        content_index: usize,
        /// Final reasoning block.
        thinking: ThinkingContent,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// A tool-call block opened at `content_index`.
    ToolCallStart {
        /// Index of the block within the message content.
        content_index: usize,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// A JSON argument fragment for the tool call at `content_index`.
    ToolCallDelta {
        /// Index of the block within the message content.
        content_index: usize,
        /// The appended JSON fragment.
        delta: String,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// The tool call at `content_index` is complete.
    ToolCallEnd {
        /// Index of the block within the message content.
        content_index: usize,
        /// The finalized call.
        tool_call: ToolCall,
        /// Snapshot so far.
        partial: AssistantMessage,
    },
    /// Terminal success.
    Done {
        /// `Stop`, `Length`, or `ToolUse`.
        reason: StopReason,
        /// The finalized message.
        message: AssistantMessage,
    },
    /// Terminal failure or abort.
    Error {
        /// `Aborted` or `Error`.
        reason: StopReason,
        /// The finalized message carrying the failure.
        error: AssistantMessage,
    },
}

impl AssistantMessageEvent {
    /// Returns `true` for `Done` and `Error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Returns the snapshot carried by a non-terminal event.
    #[must_use]
    pub const fn partial(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Start { partial }
            | Self::TextStart { partial, .. }
            | Self::TextDelta { partial, .. }
            | Self::TextEnd { partial, .. }
            | Self::ThinkingStart { partial, .. }
            | Self::ThinkingDelta { partial, .. }
            | Self::ThinkingEnd { partial, .. }
            | Self::ToolCallStart { partial, .. }
            | Self::ToolCallDelta { partial, .. }
            | Self::ToolCallEnd { partial, .. } => Some(partial),
            Self::Done { .. } | Self::Error { .. } => None,
        }
    }

    /// Returns the finalized message carried by a terminal event.
    #[must_use]
    pub const fn final_message(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Done { message, .. } => Some(message),
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}
