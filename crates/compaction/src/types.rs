//! Conversation rounds and the rolling summary published over them.

use serde::{Deserialize, Serialize};

/// One message exchanged while a round was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub recipient: String,
    pub text: String,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            text: text.into(),
        }
    }
}

/// A full exchange cycle: the user query plus every message it produced.
///
/// Rounds are append-only and addressed 1-based in the order they were
/// recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub user_query: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Round {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            messages: Vec::new(),
        }
    }

    /// Builder-style append of a message.
    #[must_use]
    pub fn with_message(
        mut self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.messages.push(Message::new(sender, recipient, text));
        self
    }
}

/// Summary of rounds `start_index..=end_index`.
///
/// There is a single accumulating summary per conversation, so
/// `start_index` is always 1. Values are replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactedSummary {
    pub start_index: usize,
    pub end_index: usize,
    pub summary_text: String,
}

impl CompactedSummary {
    pub fn new(end_index: usize, summary_text: impl Into<String>) -> Self {
        Self {
            start_index: 1,
            end_index,
            summary_text: summary_text.into(),
        }
    }

    /// Number of rounds folded into this summary.
    #[must_use]
    pub fn rounds_covered(&self) -> usize {
        (self.end_index + 1).saturating_sub(self.start_index)
    }

    /// Render as a synthetic system message, prepended to the rounds that are
    /// still kept verbatim.
    #[must_use]
    pub fn to_system_message(&self) -> String {
        format!(
            "[Conversation History Summary (Rounds {}-{})]\n{}",
            self.start_index, self.end_index, self.summary_text
        )
    }
}
