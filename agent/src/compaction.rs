//! Context compaction.
//!
//! Long sessions outgrow the model's context window. Compaction replaces an
//! old prefix of the session with an LM-generated checkpoint while keeping a
//! recent tail verbatim. The pieces:
//!
//! - a deterministic **cut-point finder** choosing where the kept tail
//!   begins, honoring a keep-recent token budget and never stranding a tool
//!   result from its call;
//! - a pure **preparation** step partitioning the session into the ranges to
//!   summarize, the optional split-turn prefix, and the kept tail;
//! - the **trigger policy** run after every agent end, distinguishing
//!   context-overflow failures (compact and automatically continue) from
//!   threshold pressure (compact only);
//! - the **orchestrator** invoking the summarizer and writing the
//!   compaction entry.
//!
//! Token estimation is deliberately a heuristic (four characters per token
//! plus a fixed weight per image). It over-estimates, so compaction triggers
//! early; exact tokenization would gain nothing here because the estimate
//! only picks cut points and compares against the threshold.

use std::fmt;
use std::sync::Arc;

use strand_core::CancelToken;
use strand_core::llm::{AssistantMessage, ContentBlock, Message, ModelRef, Provider, StopReason};
use tracing::info;

use crate::error::AgentError;
use crate::hook::{CompactAction, SessionHooks};
use crate::session::{
    CompactionEntry, FileOperations, SessionEntry, SessionEntryKind, SessionLog,
};
use crate::summarize::{SPLIT_TURN_SEPARATOR, summarize_history, summarize_turn_prefix};

/// Heuristic: one token per four characters of text.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Heuristic: flat token weight per embedded image.
pub const IMAGE_TOKENS: u64 = 1_200;

/// Tool names whose calls read files, scanned for the file-operations
/// record.
const READ_TOOLS: &[&str] = &["read", "read_file", "view"];

/// Tool names whose calls write or edit files.
const WRITE_TOOLS: &[&str] = &["write", "write_file", "edit", "edit_file", "multi_edit"];

/// Estimates tokens for one message.
#[must_use]
pub fn estimate_message_tokens(message: &Message) -> u64 {
    let mut chars = 0u64;
    let mut images = 0u64;
    match message {
        Message::User(m) => count_blocks(&m.content, &mut chars, &mut images),
        Message::Assistant(m) => count_blocks(&m.content, &mut chars, &mut images),
        Message::ToolResult(m) => {
            chars += m.tool_name.len() as u64;
            count_blocks(&m.content, &mut chars, &mut images);
        }
        Message::Custom(m) => chars += m.content.len() as u64,
    }
    chars / CHARS_PER_TOKEN + images * IMAGE_TOKENS
}

fn count_blocks(blocks: &[ContentBlock], chars: &mut u64, images: &mut u64) {
    for block in blocks {
        match block {
            ContentBlock::Text(t) => *chars += t.text.len() as u64,
            ContentBlock::Thinking(t) => *chars += t.thinking.len() as u64,
            ContentBlock::ToolCall(call) => {
                *chars += call.name.len() as u64 + call.arguments.to_string().len() as u64;
            }
            ContentBlock::Image(_) => *images += 1,
        }
    }
}

/// Estimates tokens for one session entry. Non-message entries are metadata
/// and weigh zero.
#[must_use]
pub fn estimate_entry_tokens(entry: &SessionEntry) -> u64 {
    match &entry.kind {
        SessionEntryKind::Message { message } => estimate_message_tokens(message),
        _ => 0,
    }
}

/// Estimates tokens across a message list.
#[must_use]
pub fn estimate_messages_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Where the retained tail begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutPoint {
    /// Index of the first entry kept verbatim.
    pub first_kept: usize,
    /// Index where the cut turn begins; equals `first_kept` when no split.
    pub turn_start: usize,
    /// `true` when the cut falls inside a turn.
    pub split_turn: bool,
}

/// Entries a retained tail may legally begin at: anything except a tool
/// result (which must stay adjacent to its call) and non-summary metadata.
fn is_valid_cut(entry: &SessionEntry) -> bool {
    match &entry.kind {
        SessionEntryKind::Message { message } => {
            !matches!(message, Message::ToolResult(_))
        }
        SessionEntryKind::BranchSummary { .. } => true,
        _ => false,
    }
}

fn is_turn_opener(entry: &SessionEntry) -> bool {
    match &entry.kind {
        SessionEntryKind::Message { message } => match message {
            Message::User(_) => true,
            Message::Custom(custom) => custom.kind == "bash-execution",
            _ => false,
        },
        _ => false,
    }
}

/// Finds the cut point for `entries[start..end]` honoring
/// `keep_recent_tokens`.
///
/// Walks backward accumulating the heuristic estimate of message entries
/// until the keep-recent budget is met, then selects the closest legal cut
/// at or after that position. Metadata markers immediately before the cut
/// are absorbed into the tail. When the chosen cut is not a user message,
/// the turn it interrupts is located so its prefix can be summarized
/// separately.
#[must_use]
pub fn find_cut_point(
    entries: &[SessionEntry],
    start: usize,
    end: usize,
    keep_recent_tokens: u64,
) -> CutPoint {
    let valid: Vec<usize> = (start..end)
        .filter(|&i| is_valid_cut(&entries[i]))
        .collect();
    let Some(&first_valid) = valid.first() else {
        return CutPoint {
            first_kept: start,
            turn_start: start,
            split_turn: false,
        };
    };

    let mut cut = first_valid;
    let mut total = 0u64;
    for index in (start..end).rev() {
        total += estimate_entry_tokens(&entries[index]);
        if total >= keep_recent_tokens {
            cut = match valid.iter().copied().find(|&v| v >= index) {
                Some(v) => v,
                // Every legal cut precedes the budget boundary; take the
                // closest one so turn integrity wins over the budget.
                None => *valid.last().expect("valid set is non-empty"),
            };
            break;
        }
    }

    // Metadata markers belong to the tail they precede.
    let mut first_kept = cut;
    while first_kept > start && entries[first_kept - 1].kind.is_metadata() {
        first_kept -= 1;
    }

    let cut_is_user = matches!(
        &entries[cut].kind,
        SessionEntryKind::Message {
            message: Message::User(_)
        }
    );
    if cut_is_user {
        return CutPoint {
            first_kept,
            turn_start: first_kept,
            split_turn: false,
        };
    }

    match (start..cut).rev().find(|&i| is_turn_opener(&entries[i])) {
        Some(turn_start) => CutPoint {
            first_kept,
            turn_start,
            split_turn: true,
        },
        None => CutPoint {
            first_kept,
            turn_start: first_kept,
            split_turn: false,
        },
    }
}

/// The partitioned session ranges a compaction will operate on.
#[derive(Debug, Clone)]
pub struct CompactionPreparation {
    /// Messages the history checkpoint summarizes.
    pub messages_to_summarize: Vec<Message>,
    /// Prefix of the split turn, summarized separately. Empty when the cut
    /// does not split a turn.
    pub turn_prefix_messages: Vec<Message>,
    /// Index of the first entry kept verbatim.
    pub first_kept_index: usize,
    /// Stable id of that entry.
    pub first_kept_entry_id: String,
    /// Whether the cut falls inside a turn.
    pub split_turn: bool,
    /// Summary of the previous compaction, for iterative updates.
    pub previous_summary: Option<String>,
    /// Heuristic token estimate of the whole boundary range.
    pub tokens_before: u64,
    /// File operations extracted from the summarized ranges, unioned with
    /// the previous compaction's record.
    pub file_operations: FileOperations,
}

/// Prepares a compaction over the session's latest boundary range.
///
/// Pure over the log. Returns `None` when there is nothing to summarize.
#[must_use]
pub fn prepare_compaction(log: &SessionLog, keep_recent_tokens: u64) -> Option<CompactionPreparation> {
    let entries = log.entries();
    let (boundary_start, previous) = match log.last_compaction_index() {
        Some(index) => {
            let SessionEntryKind::Compaction(previous) = &entries[index].kind else {
                return None;
            };
            (index + 1, Some(previous.clone()))
        }
        None => (0, None),
    };
    let boundary_end = entries.len();
    if boundary_start >= boundary_end {
        return None;
    }

    let cut = find_cut_point(entries, boundary_start, boundary_end, keep_recent_tokens);
    let history_end = if cut.split_turn {
        cut.turn_start
    } else {
        cut.first_kept
    };

    let messages_to_summarize = collect_messages(&entries[boundary_start..history_end]);
    let turn_prefix_messages = if cut.split_turn {
        collect_messages(&entries[cut.turn_start..cut.first_kept])
    } else {
        Vec::new()
    };
    if messages_to_summarize.is_empty() && turn_prefix_messages.is_empty() {
        return None;
    }

    let mut file_operations = previous
        .as_ref()
        .map(|p| p.details.clone())
        .unwrap_or_default();
    file_operations.merge(&extract_file_operations(&messages_to_summarize));
    file_operations.merge(&extract_file_operations(&turn_prefix_messages));

    let tokens_before = entries[boundary_start..boundary_end]
        .iter()
        .map(estimate_entry_tokens)
        .sum();

    Some(CompactionPreparation {
        messages_to_summarize,
        turn_prefix_messages,
        first_kept_index: cut.first_kept,
        first_kept_entry_id: entries[cut.first_kept].id.clone(),
        split_turn: cut.split_turn,
        previous_summary: previous.map(|p| p.summary),
        tokens_before,
        file_operations,
    })
}

fn collect_messages(entries: &[SessionEntry]) -> Vec<Message> {
    let mut messages = Vec::new();
    for entry in entries {
        match &entry.kind {
            SessionEntryKind::Message { message } => messages.push(message.clone()),
            SessionEntryKind::BranchSummary { summary } => {
                messages.push(Message::custom("branch-summary", summary.clone(), 0));
            }
            _ => {}
        }
    }
    messages
}

/// Extracts file paths from calls to known file-effecting tools.
#[must_use]
pub fn extract_file_operations(messages: &[Message]) -> FileOperations {
    let mut operations = FileOperations::default();
    for message in messages {
        let Message::Assistant(assistant) = message else {
            continue;
        };
        for call in assistant.tool_calls() {
            let Some(path) = call
                .arguments
                .get("path")
                .or_else(|| call.arguments.get("file_path"))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            let name = call.name.as_str();
            if READ_TOOLS.contains(&name) && !operations.read_files.contains(&path.to_string()) {
                operations.read_files.push(path.to_string());
            }
            if WRITE_TOOLS.contains(&name) && !operations.modified_files.contains(&path.to_string())
            {
                operations.modified_files.push(path.to_string());
            }
        }
    }
    operations
}

/// Classifier deciding whether an errored assistant message failed on
/// context overflow. Provider-specific; injected because the signal (HTTP
/// status, error code, message substring) varies by provider.
pub type OverflowClassifier = Arc<dyn Fn(&AssistantMessage) -> bool + Send + Sync>;

/// Default classifier matching common context-overflow phrasings.
#[must_use]
pub fn default_overflow_classifier() -> OverflowClassifier {
    Arc::new(|message: &AssistantMessage| {
        message.error_message.as_deref().is_some_and(|text| {
            let lower = text.to_ascii_lowercase();
            lower.contains("context length")
                || lower.contains("context window")
                || lower.contains("maximum context")
                || lower.contains("prompt is too long")
        })
    })
}

/// Compaction policy knobs.
#[derive(Clone)]
pub struct CompactionConfig {
    /// Master switch.
    pub enabled: bool,
    /// Headroom subtracted from the context window for the threshold
    /// trigger; also the baseline for summary output budgets.
    pub reserve_tokens: u64,
    /// Minimum trailing message tokens preserved verbatim.
    pub keep_recent_tokens: u64,
    /// Overflow classifier for errored assistants.
    pub is_context_overflow: OverflowClassifier,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reserve_tokens: 16_384,
            keep_recent_tokens: 20_000,
            is_context_overflow: default_overflow_classifier(),
        }
    }
}

impl fmt::Debug for CompactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionConfig")
            .field("enabled", &self.enabled)
            .field("reserve_tokens", &self.reserve_tokens)
            .field("keep_recent_tokens", &self.keep_recent_tokens)
            .finish()
    }
}

/// What a completed run asks the orchestrator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTrigger {
    /// Same-model context overflow: delete the failing response, compact,
    /// and automatically continue.
    Overflow,
    /// Context pressure above the threshold: compact, no retry.
    Threshold,
}

/// Evaluates the trigger policy for the last assistant of a run.
///
/// `trailing_tokens` is the heuristic estimate of messages appended after
/// the usage on `last` was recorded.
#[must_use]
pub fn evaluate_trigger(
    config: &CompactionConfig,
    last: &AssistantMessage,
    current_model: &ModelRef,
    trailing_tokens: u64,
    context_window: u64,
) -> Option<CompactionTrigger> {
    if !config.enabled {
        return None;
    }
    match last.stop_reason {
        StopReason::Aborted => None,
        StopReason::Error => {
            if (config.is_context_overflow)(last) && last.model.same_model(current_model) {
                Some(CompactionTrigger::Overflow)
            } else {
                // A generic failure carries no valid usage to reason about.
                None
            }
        }
        _ => {
            let context_tokens = last.usage.context_tokens() + trailing_tokens;
            (context_tokens > context_window.saturating_sub(config.reserve_tokens))
                .then_some(CompactionTrigger::Threshold)
        }
    }
}

/// Result of one compaction.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// Id of the written compaction entry.
    pub entry_id: String,
    /// The emitted summary (file-operations section included).
    pub summary: String,
    /// Heuristic token estimate of the compacted range.
    pub tokens_before: u64,
    /// File operations recorded on the entry.
    pub details: FileOperations,
}

/// Runs one compaction over the session log.
///
/// Prepares the ranges, consults the `before_compact` hook, generates the
/// checkpoint (history and turn-prefix concurrently when the cut splits a
/// turn), and writes the compaction entry. Returns `None` when there was
/// nothing to compact or the hook cancelled.
///
/// # Errors
///
/// Returns [`AgentError::Summarization`] when the summary model fails; the
/// session is left unchanged.
pub async fn compact<H: SessionHooks>(
    log: &mut SessionLog,
    provider: &dyn Provider,
    config: &CompactionConfig,
    hooks: &H,
    cancel: &CancelToken,
) -> Result<Option<CompactionOutcome>, AgentError> {
    let Some(preparation) = prepare_compaction(log, config.keep_recent_tokens) else {
        return Ok(None);
    };

    let (summary, details) = match hooks.before_compact(&preparation).await {
        CompactAction::Cancel => return Ok(None),
        CompactAction::Replace { summary, details } => (summary, details),
        CompactAction::Proceed => {
            let mut summary = if preparation.split_turn
                && !preparation.turn_prefix_messages.is_empty()
            {
                let (history, prefix) = futures::join!(
                    summarize_history(
                        provider,
                        &preparation.messages_to_summarize,
                        preparation.previous_summary.as_deref(),
                        config.reserve_tokens,
                        cancel,
                    ),
                    summarize_turn_prefix(
                        provider,
                        &preparation.turn_prefix_messages,
                        config.reserve_tokens,
                        cancel,
                    )
                );
                format!("{}{SPLIT_TURN_SEPARATOR}{}", history?, prefix?)
            } else {
                summarize_history(
                    provider,
                    &preparation.messages_to_summarize,
                    preparation.previous_summary.as_deref(),
                    config.reserve_tokens,
                    cancel,
                )
                .await?
            };
            if !preparation.file_operations.is_empty() {
                summary.push_str(&format_file_operations(&preparation.file_operations));
            }
            (summary, preparation.file_operations.clone())
        }
    };

    let entry_id = log.append(SessionEntryKind::Compaction(CompactionEntry {
        summary: summary.clone(),
        first_kept_entry_id: preparation.first_kept_entry_id.clone(),
        tokens_before: preparation.tokens_before,
        details: details.clone(),
    }));
    info!(
        entry_id = %entry_id,
        tokens_before = preparation.tokens_before,
        split_turn = preparation.split_turn,
        "session compacted"
    );
    hooks.on_compact(&summary, &details).await;

    Ok(Some(CompactionOutcome {
        entry_id,
        summary,
        tokens_before: preparation.tokens_before,
        details,
    }))
}

fn format_file_operations(operations: &FileOperations) -> String {
    let mut section = String::from("\n\n**File Operations:**\n");
    if !operations.read_files.is_empty() {
        section.push_str("\nRead:\n");
        for path in &operations.read_files {
            section.push_str("- ");
            section.push_str(path);
            section.push('\n');
        }
    }
    if !operations.modified_files.is_empty() {
        section.push_str("\nModified:\n");
        for path in &operations.modified_files {
            section.push_str("- ");
            section.push_str(path);
            section.push('\n');
        }
    }
    section
}
