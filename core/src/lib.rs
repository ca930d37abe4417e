//! # strand-core
//!
//! Portable data model and traits for the strand agent runtime. This crate
//! describes conversations, streaming response events, tools, and the
//! provider seam in a provider-agnostic way; it never talks to a network and
//! never executes anything itself.
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │  Agent runtime  │───▶│   strand-core    │◀───│   Providers     │
//! │  (strand-agent) │    │   (this crate)   │    │                 │
//! │                 │    │                  │    │ - anthropic     │
//! │ - run loop      │    │ - Message        │    │ - openai        │
//! │ - compaction    │    │ - Provider       │    │ - local models  │
//! │ - transforms    │    │ - Tool / Tools   │    │                 │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! ## Design
//!
//! The crate only *describes* behavior. Providers implement [`Provider`] by
//! emitting [`llm::AssistantMessageEvent`]s; tool authors implement
//! [`llm::Tool`] with typed arguments; the agent runtime owns scheduling,
//! tool execution, and event delivery. Cancellation is cooperative: both
//! providers and tools poll a [`CancelToken`] rather than being preempted.
//!
//! ## Modules
//!
//! - [`llm`] — messages, content blocks, stream events, options, tools, the
//!   provider trait.
//! - [`cancel`] — the shared cooperative cancellation flag.

#![no_std]
extern crate alloc;

pub mod cancel;
pub mod llm;

#[doc(inline)]
pub use cancel::CancelToken;
#[doc(inline)]
pub use llm::{Provider, Tool};

/// Result type used by tool implementations.
///
/// Type alias for [`anyhow::Result<T>`](anyhow::Result) with
/// [`llm::ToolResult`] as the default success type.
pub type Result<T = llm::ToolResult> = anyhow::Result<T>;

pub use anyhow::Error;
