//! Text assembly for summarization requests.

use {
    loam_common::text::truncate_chars,
    loam_config::{
        CompactionConfig,
        template::{CONTENT_PLACEHOLDER, DEFAULT_COMPACTION_PROMPT, PREVIOUS_SUMMARY_PLACEHOLDER},
    },
};

use crate::types::Round;

/// Stand-in for the previous summary on the first pass.
pub const NO_PREVIOUS_SUMMARY: &str = "None";

/// Render rounds `[from, to)` (0-based, half-open) as the plain-text block a
/// summarizer folds into the running summary.
///
/// Message text longer than `preview_chars` characters is cut and marked with
/// an ellipsis; the summary does not need full content. Out-of-range bounds are
/// clamped to the slice.
pub fn build_compaction_content(
    rounds: &[Round],
    from: usize,
    to: usize,
    preview_chars: usize,
) -> String {
    let to = to.min(rounds.len());
    let from = from.min(to);

    let mut lines = Vec::new();
    for (offset, round) in rounds[from..to].iter().enumerate() {
        lines.push(format!("\n--- Round {} ---", from + offset + 1));
        lines.push(format!("User Query: {}", round.user_query));
        for msg in &round.messages {
            lines.push(format!(
                "  {} -> {}: {}",
                msg.sender,
                msg.recipient,
                truncate_chars(&msg.text, preview_chars)
            ));
        }
    }
    lines.join("\n")
}

/// Prompt text with `{PREVIOUS_SUMMARY}` and `{content}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_COMPACTION_PROMPT)
    }
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Template named by `prompt_template_path`, or the built-in one.
    pub fn from_config(config: &CompactionConfig) -> Self {
        Self::new(loam_config::load_prompt_template(
            config.prompt_template_path.as_deref(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Substitute both placeholders in a single left-to-right scan, so text
    /// inside the summary or the rounds is never re-expanded.
    pub fn render(&self, content: &str, previous_summary: &str) -> String {
        let mut out =
            String::with_capacity(self.text.len() + content.len() + previous_summary.len());
        let mut rest = self.text.as_str();

        loop {
            let next = [
                (PREVIOUS_SUMMARY_PLACEHOLDER, previous_summary),
                (CONTENT_PLACEHOLDER, content),
            ]
            .into_iter()
            .filter_map(|(placeholder, value)| {
                rest.find(placeholder).map(|pos| (pos, placeholder, value))
            })
            .min_by_key(|(pos, ..)| *pos);

            let Some((pos, placeholder, value)) = next else {
                out.push_str(rest);
                return out;
            };
            out.push_str(&rest[..pos]);
            out.push_str(value);
            rest = &rest[pos + placeholder.len()..];
        }
    }
}
