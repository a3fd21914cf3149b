//! Prompt-side view of a compacted conversation.

use crate::{compactor::CompactionProvider, types::Round};

/// What a prompt builder should send: an optional summary system message
/// followed by the rounds it does not cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactedContext<'a> {
    pub summary: Option<String>,
    pub rounds: &'a [Round],
}

impl CompactedContext<'_> {
    pub fn is_compacted(&self) -> bool {
        self.summary.is_some()
    }
}

/// Split `rounds` into the published summary and the uncovered tail.
///
/// A summary covering more rounds than `rounds` holds (e.g. the log was
/// replaced) yields an empty tail rather than panicking.
pub fn compacted_context<'a>(
    provider: &dyn CompactionProvider,
    rounds: &'a [Round],
) -> CompactedContext<'a> {
    match provider.get_compaction() {
        Some(summary) => {
            let covered = summary.end_index.min(rounds.len());
            CompactedContext {
                summary: Some(summary.to_system_message()),
                rounds: &rounds[covered..],
            }
        },
        None => CompactedContext {
            summary: None,
            rounds,
        },
    }
}
