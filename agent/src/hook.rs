//! Session hooks.
//!
//! Embedders customize compaction and branching at three points. All
//! methods have default no-op implementations; hooks compose at compile
//! time as a generic parameter on [`crate::AgentSession`], so un-hooked
//! sessions pay nothing.

use crate::compaction::CompactionPreparation;
use crate::session::FileOperations;

/// Verdict of a `before_compact` hook.
#[derive(Debug, Clone)]
pub enum CompactAction {
    /// Run compaction as prepared.
    Proceed,
    /// Skip this compaction entirely.
    Cancel,
    /// Write the given summary and details instead of invoking the model.
    Replace {
        /// Substitute summary text.
        summary: String,
        /// Substitute file-operations record.
        details: FileOperations,
    },
}

/// Intercepts session-level operations.
pub trait SessionHooks: Send + Sync {
    /// Called with the prepared ranges before summarization starts.
    fn before_compact(
        &self,
        _preparation: &CompactionPreparation,
    ) -> impl core::future::Future<Output = CompactAction> + Send {
        async { CompactAction::Proceed }
    }

    /// Called after the compaction entry has been written.
    fn on_compact(
        &self,
        _summary: &str,
        _details: &FileOperations,
    ) -> impl core::future::Future<Output = ()> + Send {
        async {}
    }

    /// Called before a branch summary is generated; returning a summary
    /// skips the model call. Branch summaries are one-shot, never updated
    /// iteratively.
    fn before_fork(&self) -> impl core::future::Future<Output = Option<String>> + Send {
        async { None }
    }
}

impl SessionHooks for () {}
