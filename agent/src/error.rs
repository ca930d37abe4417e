//! Runtime error types.
//!
//! Most failures in a run are data, not errors: a broken provider stream
//! becomes an assistant message with `stop_reason = Error`, a failing tool
//! becomes a tool result with `is_error = true`. [`AgentError`] covers what
//! is left — contract violations and failures outside a turn.

use core::fmt;

/// Errors that escape the agent loop.
#[derive(Debug, Clone)]
pub enum AgentError {
    /// The provider violated the stream contract (e.g. ended without a
    /// terminal event).
    Llm(String),

    /// A public operation was called in a state that forbids it (e.g.
    /// continuing a run whose last message is an assistant).
    InvalidState(String),

    /// API key resolution failed. Not caught by the runtime; escapes to the
    /// caller.
    Auth(String),

    /// The summarization model failed during compaction. The session is
    /// left unchanged.
    Summarization(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm(message) => write!(f, "provider error: {message}"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::Auth(message) => write!(f, "authentication failed: {message}"),
            Self::Summarization(message) => write!(f, "summarization failed: {message}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<anyhow::Error> for AgentError {
    fn from(error: anyhow::Error) -> Self {
        Self::Llm(error.to_string())
    }
}
