//! Agent-level events.
//!
//! Everything a UI needs to render a run arrives through this one union,
//! delivered in a strict order: `agent_start` precedes any `turn_start`; a
//! turn's `message_*` and `tool_execution_*` events land between its
//! `turn_start` and `turn_end`; `agent_end` closes the run and carries every
//! message the run produced.

use serde::Serialize;
use serde_json::Value;
use strand_core::llm::{AssistantMessageEvent, Message, ToolResult};

use crate::stream::TerminalEvent;

/// Events emitted during one agent run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// Run opened.
    AgentStart,

    /// Run closed; carries all messages the run appended.
    AgentEnd {
        /// Messages produced by this run, in order.
        messages: Vec<Message>,
    },

    /// One assistant response (plus its tool calls) is starting.
    TurnStart,

    /// The turn finished.
    TurnEnd {
        /// The assistant message of the turn.
        message: Box<Message>,
        /// Tool results produced during the turn.
        tool_results: Vec<Message>,
    },

    /// A message was appended to the context.
    MessageStart {
        /// The appended message (possibly a streaming shell).
        message: Message,
    },

    /// A streaming assistant message grew.
    MessageUpdate {
        /// Snapshot of the growing message.
        message: Message,
        /// The raw provider event behind the update.
        assistant_message_event: Box<AssistantMessageEvent>,
    },

    /// A message is final.
    MessageEnd {
        /// The finalized message.
        message: Message,
    },

    /// A tool call is about to execute.
    ToolExecutionStart {
        /// Id of the tool call.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Validated-or-raw arguments as sent to the tool.
        args: Value,
    },

    /// A tool reported intermediate output.
    ToolExecutionUpdate {
        /// Id of the tool call.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Arguments as sent to the tool.
        args: Value,
        /// Intermediate snapshot.
        partial_result: ToolResult,
    },

    /// A tool call finished.
    ToolExecutionEnd {
        /// Id of the tool call.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Final output.
        result: ToolResult,
        /// Whether the result is an error (including synthesized skips).
        is_error: bool,
    },
}

impl AgentEvent {
    /// Returns `true` for `agent_end`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::AgentEnd { .. })
    }

    /// Short name of the event kind, matching the serialized tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::TurnStart => "turn_start",
            Self::TurnEnd { .. } => "turn_end",
            Self::MessageStart { .. } => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionUpdate { .. } => "tool_execution_update",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
        }
    }
}

impl TerminalEvent for AgentEvent {
    type Output = Vec<Message>;

    fn terminal(&self) -> Option<Vec<Message>> {
        match self {
            Self::AgentEnd { messages } => Some(messages.clone()),
            _ => None,
        }
    }
}
