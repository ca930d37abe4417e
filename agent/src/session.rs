//! Session entries and the session-bound agent.
//!
//! A session is a persistent log of typed records forming a tree through
//! parent ids; the runtime works over one linear path of it. Besides plain
//! messages the log records branch summaries, compaction checkpoints, and
//! metadata markers (thinking-level changes, model changes, labels). Entry
//! ids are stable: compaction references the first retained entry by id, and
//! reloads rebuild the working history from that point.
//!
//! [`AgentSession`] binds an [`Agent`] to a log and applies the compaction
//! trigger policy after every run.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strand_core::CancelToken;
use strand_core::llm::{AssistantMessage, Message};

use crate::agent::Agent;
use crate::clock::{Clock, SystemClock};
use crate::compaction::{
    CompactionConfig, CompactionTrigger, compact, estimate_messages_tokens, evaluate_trigger,
};
use crate::error::AgentError;
use crate::event::AgentEvent;
use crate::hook::SessionHooks;
use crate::stream::EventSink;

/// Files touched by summarized history, carried on compaction entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperations {
    /// Paths read.
    pub read_files: Vec<String>,
    /// Paths written or edited.
    pub modified_files: Vec<String>,
}

impl FileOperations {
    /// Unions another set into this one, deduplicating while preserving
    /// first-seen order.
    pub fn merge(&mut self, other: &Self) {
        for path in &other.read_files {
            if !self.read_files.contains(path) {
                self.read_files.push(path.clone());
            }
        }
        for path in &other.modified_files {
            if !self.modified_files.contains(path) {
                self.modified_files.push(path.clone());
            }
        }
    }

    /// Returns `true` when both sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_files.is_empty() && self.modified_files.is_empty()
    }
}

/// A compaction checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    /// The generated summary, including the file-operations section.
    pub summary: String,
    /// Id of the first session entry retained verbatim after the summary.
    pub first_kept_entry_id: String,
    /// Heuristic token estimate of the history before compaction.
    pub tokens_before: u64,
    /// File operations extracted from the summarized history.
    pub details: FileOperations,
}

/// One typed record in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEntryKind {
    /// A conversation message (any role, custom variants included).
    Message {
        /// The message payload.
        message: Message,
    },
    /// Summary of a sibling branch merged back into this path.
    BranchSummary {
        /// The branch summary text.
        summary: String,
    },
    /// A compaction checkpoint.
    Compaction(CompactionEntry),
    /// The reasoning effort changed.
    ThinkingLevelChange {
        /// New level, e.g. `high`.
        level: String,
    },
    /// The active model changed.
    ModelChange {
        /// New provider name.
        provider: String,
        /// New model id.
        model_id: String,
    },
    /// A user-assigned label.
    Label {
        /// Label text.
        label: String,
    },
}

impl SessionEntryKind {
    /// Returns `true` for marker entries that carry no conversation content
    /// and weigh zero tokens.
    #[must_use]
    pub const fn is_metadata(&self) -> bool {
        matches!(
            self,
            Self::ThinkingLevelChange { .. } | Self::ModelChange { .. } | Self::Label { .. }
        )
    }
}

/// One session record with a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Stable unique id.
    pub id: String,
    /// Parent entry id; `None` for the root.
    pub parent: Option<String>,
    /// The typed payload.
    #[serde(flatten)]
    pub kind: SessionEntryKind,
}

/// An append-only linear path of session entries.
///
/// Ids are assigned sequentially and never reused, so removing an entry
/// (overflow recovery deletes the failing assistant) keeps the remaining
/// ids stable.
#[derive(Debug, Default)]
pub struct SessionLog {
    entries: Vec<SessionEntry>,
    next_id: u64,
}

impl SessionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, returning its id.
    pub fn append(&mut self, kind: SessionEntryKind) -> String {
        self.next_id += 1;
        let id = format!("e{}", self.next_id);
        let parent = self.entries.last().map(|entry| entry.id.clone());
        self.entries.push(SessionEntry {
            id: id.clone(),
            parent,
            kind,
        });
        id
    }

    /// Appends a message entry, returning its id.
    pub fn append_message(&mut self, message: Message) -> String {
        self.append(SessionEntryKind::Message { message })
    }

    /// Returns the entries in order.
    #[must_use]
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the index of the entry with the given id.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// Removes the entry with the given id, stitching its child's parent
    /// link to the removed entry's parent.
    pub fn remove(&mut self, id: &str) -> Option<SessionEntry> {
        let index = self.index_of(id)?;
        let removed = self.entries.remove(index);
        if let Some(next) = self.entries.get_mut(index) {
            next.parent = removed.parent.clone();
        }
        Some(removed)
    }

    /// Removes the most recent assistant message entry, returning its id.
    ///
    /// Used by overflow recovery to delete the failing response before
    /// compacting.
    pub fn remove_last_assistant(&mut self) -> Option<String> {
        let index = self.entries.iter().rposition(|entry| {
            matches!(
                &entry.kind,
                SessionEntryKind::Message {
                    message: Message::Assistant(_)
                }
            )
        })?;
        let id = self.entries[index].id.clone();
        self.remove(&id);
        Some(id)
    }

    /// Index of the most recent compaction entry.
    #[must_use]
    pub fn last_compaction_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|entry| matches!(entry.kind, SessionEntryKind::Compaction(_)))
    }

    /// Rebuilds the working message history from the latest compaction
    /// checkpoint (or from the beginning when none exists).
    ///
    /// The checkpoint's summary becomes a `compaction-summary` custom
    /// message stamped with `now_ms`, followed by the messages of every
    /// entry from the checkpoint's first-kept id onward; branch summaries
    /// render as `branch-summary` custom messages.
    #[must_use]
    pub fn working_messages(&self, now_ms: i64) -> Vec<Message> {
        let (start, mut messages) = match self.last_compaction_index() {
            Some(index) => {
                let SessionEntryKind::Compaction(compaction) = &self.entries[index].kind else {
                    unreachable!("last_compaction_index returned a non-compaction entry");
                };
                let summary =
                    Message::custom("compaction-summary", compaction.summary.clone(), now_ms);
                let start = self
                    .index_of(&compaction.first_kept_entry_id)
                    .unwrap_or(index + 1);
                (start, vec![summary])
            }
            None => (0, Vec::new()),
        };
        for entry in &self.entries[start..] {
            match &entry.kind {
                SessionEntryKind::Message { message } => messages.push(message.clone()),
                SessionEntryKind::BranchSummary { summary } => {
                    messages.push(Message::custom("branch-summary", summary.clone(), now_ms));
                }
                _ => {}
            }
        }
        messages
    }
}

/// An [`Agent`] bound to a session log with automatic compaction.
///
/// Every message a run produces is appended to the log, and after every run
/// the compaction trigger policy is evaluated:
///
/// - a same-model context-overflow failure deletes the failing assistant
///   entry, compacts, reloads the working history, waits briefly, and
///   continues the run without user intervention;
/// - threshold pressure compacts and reloads, without a retry;
/// - aborted and otherwise-errored runs leave the session untouched.
///
/// Hooks compose at compile time; `AgentSession<()>` pays nothing for them.
pub struct AgentSession<H: SessionHooks = ()> {
    /// The wrapped agent. Public so embedders can queue steering, swap
    /// providers, or register sources between runs.
    pub agent: Agent,
    log: SessionLog,
    compaction: CompactionConfig,
    hooks: H,
    clock: Arc<dyn Clock>,
}

/// Delay before the automatic continue after an overflow compaction, so a
/// persistent failure cannot spin the loop.
const OVERFLOW_RETRY_DELAY: Duration = Duration::from_millis(100);

impl AgentSession<()> {
    /// Creates a session without hooks.
    #[must_use]
    pub fn new(agent: Agent, compaction: CompactionConfig) -> Self {
        Self::with_hooks(agent, compaction, ())
    }
}

impl<H: SessionHooks> AgentSession<H> {
    /// Creates a session with hooks.
    #[must_use]
    pub fn with_hooks(agent: Agent, compaction: CompactionConfig, hooks: H) -> Self {
        Self {
            agent,
            log: SessionLog::new(),
            compaction,
            hooks,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source. Primarily for tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the session log.
    #[must_use]
    pub const fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Returns the compaction configuration.
    #[must_use]
    pub const fn compaction(&self) -> &CompactionConfig {
        &self.compaction
    }

    /// Runs one user prompt through the agent.
    ///
    /// # Errors
    ///
    /// Propagates [`AgentError`] from the run or from compaction.
    pub async fn prompt(
        &mut self,
        text: impl Into<String>,
        events: &EventSink<AgentEvent>,
        cancel: CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        let message = Message::user(text, self.clock.now_ms());
        self.run(vec![message], events, cancel).await
    }

    /// Runs the agent with the given prompts, then applies the compaction
    /// trigger policy.
    ///
    /// # Errors
    ///
    /// Propagates [`AgentError`] from the run or from compaction.
    pub async fn run(
        &mut self,
        prompts: Vec<Message>,
        events: &EventSink<AgentEvent>,
        cancel: CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        let before = self.agent.messages().len();
        let last = self.agent.run(prompts, events, cancel.clone()).await?;
        self.append_new_messages(before);
        self.after_run(last, events, cancel).await
    }

    /// Re-enters the loop without a new prompt, then applies the trigger
    /// policy.
    ///
    /// # Errors
    ///
    /// Propagates [`AgentError`] from the run or from compaction.
    pub async fn continue_run(
        &mut self,
        events: &EventSink<AgentEvent>,
        cancel: CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        let before = self.agent.messages().len();
        let last = self.agent.continue_run(events, cancel.clone()).await?;
        self.append_new_messages(before);
        self.after_run(last, events, cancel).await
    }

    fn append_new_messages(&mut self, from: usize) {
        for message in &self.agent.messages()[from.min(self.agent.messages().len())..] {
            self.log.append_message(message.clone());
        }
    }

    async fn after_run(
        &mut self,
        last: AssistantMessage,
        events: &EventSink<AgentEvent>,
        cancel: CancelToken,
    ) -> Result<AssistantMessage, AgentError> {
        let provider = self.agent.provider();
        let trigger = evaluate_trigger(
            &self.compaction,
            &last,
            provider.model(),
            self.trailing_tokens(),
            provider.context_window(),
        );
        match trigger {
            None => Ok(last),
            Some(CompactionTrigger::Threshold) => {
                self.compact_and_reload(&cancel).await?;
                Ok(last)
            }
            Some(CompactionTrigger::Overflow) => {
                self.log.remove_last_assistant();
                self.compact_and_reload(&cancel).await?;
                // The failing response is gone from the log; mirror that in
                // the working history even when nothing was compacted.
                let now = self.clock.now_ms();
                self.agent.replace_messages(self.log.working_messages(now));
                tokio::time::sleep(OVERFLOW_RETRY_DELAY).await;

                let before = self.agent.messages().len();
                let resumed = self.agent.continue_run(events, cancel.clone()).await?;
                self.append_new_messages(before);

                // One threshold check after the retry; no second automatic
                // continue, so a persistently failing model cannot loop.
                let provider = self.agent.provider();
                if evaluate_trigger(
                    &self.compaction,
                    &resumed,
                    provider.model(),
                    self.trailing_tokens(),
                    provider.context_window(),
                ) == Some(CompactionTrigger::Threshold)
                {
                    self.compact_and_reload(&cancel).await?;
                }
                Ok(resumed)
            }
        }
    }

    async fn compact_and_reload(&mut self, cancel: &CancelToken) -> Result<(), AgentError> {
        let provider = self.agent.provider();
        let outcome = compact(
            &mut self.log,
            provider.as_ref(),
            &self.compaction,
            &self.hooks,
            cancel,
        )
        .await?;
        if outcome.is_some() {
            let now = self.clock.now_ms();
            self.agent.replace_messages(self.log.working_messages(now));
        }
        Ok(())
    }

    /// Estimated tokens of messages appended after the last usage-bearing
    /// assistant response.
    fn trailing_tokens(&self) -> u64 {
        let messages = self.agent.messages();
        let anchor = messages.iter().rposition(|message| {
            message
                .as_assistant()
                .is_some_and(|a| !a.stop_reason.is_failure() && a.usage.context_tokens() > 0)
        });
        match anchor {
            Some(index) => estimate_messages_tokens(&messages[index + 1..]),
            None => estimate_messages_tokens(messages),
        }
    }
}
