//! # Language model interface
//!
//! Everything the agent runtime needs from a model provider, in a
//! provider-agnostic shape:
//!
//! - **[`Provider`]** — the streaming seam: one call in, one event stream out
//! - **[`Context`]** — system prompt, tool definitions, and message history
//! - **[`AssistantMessageEvent`]** — the normalized streaming event union
//! - **[`Message`]** — the conversation message union
//! - **[`Tool`] / [`Tools`]** — function calling with schema validation
//!
//! ## Design
//!
//! This crate emits and describes; it never executes. A provider adapter maps
//! its wire protocol onto [`AssistantMessageEvent`]s, each carrying the full
//! partial-message snapshot so far. Tool calls are *requests*: the agent
//! runtime decides whether and how to run them. Failures are data, not
//! panics — a broken connection becomes a terminal `Error` event whose
//! message has `stop_reason = Error`.
//!
//! ## Consuming a stream
//!
//! ```rust,ignore
//! use futures_lite::StreamExt;
//! use strand_core::llm::AssistantMessageEvent;
//!
//! let mut stream = provider.stream(&context, &options);
//! while let Some(event) = stream.next().await {
//!     match event {
//!         AssistantMessageEvent::TextDelta { delta, .. } => print!("{delta}"),
//!         AssistantMessageEvent::Done { message, .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod event;
pub mod message;
pub mod model;
pub mod schema;
pub mod tool;

use alloc::{boxed::Box, string::String, vec::Vec};
use core::pin::Pin;

pub use event::AssistantMessageEvent;
use futures_core::Stream;
use futures_lite::{StreamExt, pin};
pub use message::{
    AssistantMessage, ContentBlock, Cost, CustomMessage, ImageContent, Message, ModelRef,
    StopReason, TextContent, ThinkingContent, ToolCall, ToolResultMessage, Usage, UserMessage,
};
pub use model::{CacheRetention, ReasoningEffort, StreamOptions};
pub use schema::{ValidationError, ValidationIssue, coerce_arguments};
pub use tool::{Tool, ToolDefinition, ToolResult, ToolUpdateFn, Tools};

/// Boxed stream of assistant events, as returned by [`Provider::stream`].
pub type BoxEventStream = Pin<Box<dyn Stream<Item = AssistantMessageEvent> + Send>>;

/// Everything a provider needs to execute one model call.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Context {
    /// System prompt, if any.
    pub system_prompt: Option<String>,
    /// Tools the model may call; possibly empty.
    pub tools: Vec<ToolDefinition>,
    /// Conversation history. Must contain only model-facing messages.
    pub messages: Vec<Message>,
}

/// A streaming language model.
///
/// Implementations translate [`Context`] + [`StreamOptions`] into their wire
/// protocol and fold the response back into [`AssistantMessageEvent`]s. The
/// contract:
///
/// - every stream ends with exactly one terminal `Done` or `Error` event;
///   transport failures become `Error` events, never panics
/// - `options.signal` is polled; once it fires the stream terminates with an
///   `Error` event whose reason is `Aborted`
/// - each non-terminal event carries the full partial snapshot so far, and
///   the snapshot's content list only ever grows
pub trait Provider: Send + Sync {
    /// Identity of the model this provider speaks to.
    fn model(&self) -> &ModelRef;

    /// Advertised context window (input plus output tokens).
    fn context_window(&self) -> u64;

    /// Whether the model advertises extra-high reasoning effort.
    ///
    /// Callers clamp [`ReasoningEffort::XHigh`] to `High` when this is
    /// `false`.
    fn supports_xhigh(&self) -> bool {
        false
    }

    /// Starts one streaming response.
    fn stream(&self, context: &Context, options: &StreamOptions) -> BoxEventStream;
}

/// Drains a provider stream and returns the finalized message.
///
/// Returns `None` if the stream ends without a terminal event, which is a
/// provider contract violation.
pub async fn collect_final<S>(stream: S) -> Option<AssistantMessage>
where
    S: Stream<Item = AssistantMessageEvent>,
{
    pin!(stream);
    let mut last = None;
    while let Some(event) = stream.next().await {
        if let Some(message) = event.final_message() {
            last = Some(message.clone());
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_final_returns_terminal_message() {
        let model = ModelRef::new("test", "test-api", "test-model");
        let mut message = AssistantMessage::partial(model.clone(), 0);
        message.content.push(ContentBlock::text("hi"));

        let events = alloc::vec![
            AssistantMessageEvent::Start {
                partial: AssistantMessage::partial(model.clone(), 0),
            },
            AssistantMessageEvent::Done {
                reason: StopReason::Stop,
                message: message.clone(),
            },
        ];
        let collected = collect_final(futures_lite::stream::iter(events)).await;
        assert_eq!(collected, Some(message));
    }

    #[tokio::test]
    async fn collect_final_none_without_terminal() {
        let model = ModelRef::new("test", "test-api", "test-model");
        let events = alloc::vec![AssistantMessageEvent::Start {
            partial: AssistantMessage::partial(model, 0),
        }];
        assert!(collect_final(futures_lite::stream::iter(events)).await.is_none());
    }
}
