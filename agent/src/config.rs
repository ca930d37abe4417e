//! Agent configuration.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use strand_core::CancelToken;
use strand_core::llm::{CustomMessage, Message, StreamOptions};

use crate::error::AgentError;

/// Async hook rewriting the agent-visible history before each model call.
///
/// Runs on the full message list (custom variants included) and may inject,
/// drop, or reorder messages. Receives the run's cancellation token.
pub type ContextTransformFn = Arc<
    dyn Fn(Vec<Message>, CancelToken) -> BoxFuture<'static, Result<Vec<Message>, AgentError>>
        + Send
        + Sync,
>;

/// Maps a custom message to model-facing messages.
///
/// Returning an empty vector drops the variant from model context.
pub type ConvertToLlmFn = Arc<dyn Fn(&CustomMessage) -> Vec<Message> + Send + Sync>;

/// Resolves the API key for a provider name.
pub type ApiKeyFn =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<String, AgentError>> + Send + Sync>;

/// Default conversion for the custom kinds this workspace produces.
///
/// `compaction-summary` and `branch-summary` become plain user messages;
/// `bash-execution` renders its command/output payload as user text; unknown
/// kinds drop.
#[must_use]
pub fn default_convert_to_llm() -> ConvertToLlmFn {
    Arc::new(|custom: &CustomMessage| match custom.kind.as_str() {
        "compaction-summary" | "branch-summary" | "bash-execution" => {
            vec![Message::user(custom.content.clone(), custom.timestamp)]
        }
        _ => Vec::new(),
    })
}

/// Configuration for agent behavior.
#[derive(Clone)]
pub struct AgentConfig {
    /// System prompt for all requests.
    pub system_prompt: Option<String>,

    /// Cap on consecutive tool-calling turns in one run. Exceeding it stops
    /// the run with an error-stop assistant message.
    pub max_tool_iterations: usize,

    /// Default stream options for provider calls.
    pub stream_options: StreamOptions,

    /// Optional hook rewriting the history before each model call.
    pub transform_context: Option<ContextTransformFn>,

    /// Converts custom message variants for model context.
    pub convert_to_llm: ConvertToLlmFn,

    /// Optional API key resolver; failures escape the run as
    /// [`AgentError::Auth`].
    pub get_api_key: Option<ApiKeyFn>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_iterations: 50,
            stream_options: StreamOptions::default(),
            transform_context: None,
            convert_to_llm: default_convert_to_llm(),
            get_api_key: None,
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("system_prompt", &self.system_prompt)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("stream_options", &self.stream_options)
            .field("transform_context", &self.transform_context.as_ref().map(|_| "<fn>"))
            .field("get_api_key", &self.get_api_key.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl AgentConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the tool iteration cap.
    #[must_use]
    pub const fn with_max_tool_iterations(mut self, limit: usize) -> Self {
        self.max_tool_iterations = limit;
        self
    }

    /// Sets the default stream options.
    #[must_use]
    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }
}
