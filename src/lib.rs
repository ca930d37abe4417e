//! # strand
//!
//! Façade crate re-exporting [`strand_core`] plus, behind the `agent`
//! feature, the [`strand_agent`] runtime. Pull this crate into your binary
//! to build a tool-using assistant on any provider that implements the core
//! traits.
//!
//! ## What's inside?
//!
//! - [`llm`] — messages, streaming events, tools, and the [`Provider`] seam.
//! - [`agent`] — the run loop with steering, cross-model history
//!   normalization, and context compaction.
//!
//! ## Example
//!
//! ```rust,ignore
//! use strand::agent::{Agent, AgentConfig, AgentEvent, EventStream};
//! use strand::llm::{Message, Tools};
//! use strand::CancelToken;
//!
//! let mut agent = Agent::new(my_provider, Tools::new(), AgentConfig::default());
//! let (sink, events) = EventStream::<AgentEvent>::channel();
//! let answer = agent
//!     .run(vec![Message::user("hi", now_ms)], &sink, CancelToken::new())
//!     .await?;
//! ```

pub use strand_core::*;

#[cfg(feature = "agent")]
pub use strand_agent as agent;
