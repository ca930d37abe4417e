//! # strand-agent
//!
//! The strand agent runtime: a streaming tool-use loop over any
//! [`strand_core::Provider`], with mid-run steering, follow-up queuing,
//! cross-model history normalization, and automatic context compaction for
//! long sessions.
//!
//! ## Anatomy of a run
//!
//! ```text
//!  prompts ──▶ Agent::run ──▶ provider stream ──▶ partial message folding
//!                 │                                        │
//!                 │◀── tool calls ◀────────────────────────┘
//!                 │──▶ validate + execute ──▶ tool results
//!                 │──▶ steering poll (after every tool, between turns)
//!                 │──▶ follow-up poll (when the run would stop)
//!                 └──▶ AgentEvents through an EventSink
//! ```
//!
//! Wrap the agent in an [`AgentSession`] to bind it to a session log with
//! automatic compaction: context pressure triggers an LM-generated
//! checkpoint that replaces old history, and a same-model context-overflow
//! failure compacts and resumes the run without user intervention.
//!
//! ## Example
//!
//! ```rust,ignore
//! use strand_agent::{Agent, AgentConfig, AgentEvent, EventStream};
//! use strand_core::{CancelToken, llm::{Message, Tools}};
//!
//! let mut agent = Agent::new(provider, Tools::new(), AgentConfig::default());
//! let (sink, mut events) = EventStream::<AgentEvent>::channel();
//! let cancel = CancelToken::new();
//!
//! let run = agent.run(vec![Message::user("list the files", now)], &sink, cancel);
//! // Consume `events` concurrently; `run` resolves with the final message.
//! ```

/// The agent run loop.
pub mod agent;
/// Time sources.
pub mod clock;
/// Compaction: cut points, triggers, and the orchestrator.
pub mod compaction;
/// Agent configuration.
pub mod config;
/// Runtime errors.
pub mod error;
/// Agent-level events.
pub mod event;
/// Session hooks.
pub mod hook;
/// Fault-tolerant streaming JSON.
pub mod partial_json;
/// The proxy event codec.
pub mod proxy;
/// Steering and follow-up queues.
pub mod queue;
/// Session entries and the session-bound agent.
pub mod session;
/// Event queue with terminal-result extraction.
pub mod stream;
/// LM-generated history summaries.
pub mod summarize;
/// Cross-model message normalization.
pub mod transform;

pub use agent::{Agent, MessageSourceFn};
pub use clock::{Clock, SystemClock};
pub use compaction::{CompactionConfig, CompactionTrigger, CutPoint, prepare_compaction};
pub use config::AgentConfig;
pub use error::AgentError;
pub use event::AgentEvent;
pub use hook::{CompactAction, SessionHooks};
pub use queue::QueueMode;
pub use session::{AgentSession, SessionEntry, SessionEntryKind, SessionLog};
pub use stream::{EventSink, EventStream, TerminalEvent};
