//! Compaction prompt template loading.
//!
//! A template file is YAML with a single `content` key. The text may use two
//! placeholders: `{PREVIOUS_SUMMARY}` (the last published summary, or `None`)
//! and `{content}` (the rendered rounds being folded in).

use std::path::Path;

use {
    serde::Deserialize,
    tracing::{debug, warn},
};

/// Placeholder replaced with the previous summary text.
pub const PREVIOUS_SUMMARY_PLACEHOLDER: &str = "{PREVIOUS_SUMMARY}";

/// Placeholder replaced with the rounds being summarized.
pub const CONTENT_PLACEHOLDER: &str = "{content}";

/// Built-in prompt used when no template file is configured or it is unusable.
pub const DEFAULT_COMPACTION_PROMPT: &str = "\
Summarize the following conversation history concisely.
Focus on: key decisions made, important information exchanged, and current state.
Preserve any critical details that would be needed to continue the conversation.

## Previous summary
{PREVIOUS_SUMMARY}

## Conversation to summarize
{content}

Provide a clear, structured summary:";

#[derive(Debug, Deserialize)]
struct TemplateFile {
    content: Option<String>,
}

/// Read the `content` key from a YAML template file.
pub fn read_prompt_template(path: &Path) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let file: TemplateFile = serde_yaml::from_str(&raw)?;
    file.content
        .ok_or_else(|| anyhow::anyhow!("{} has no `content` key", path.display()))
}

/// Resolve the prompt template for a compactor.
///
/// `None` yields [`DEFAULT_COMPACTION_PROMPT`]. Any read or parse failure also
/// falls back to the default, so a broken template file never disables
/// compaction.
pub fn load_prompt_template(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_COMPACTION_PROMPT.to_string();
    };

    match read_prompt_template(path) {
        Ok(content) => {
            debug!(path = %path.display(), "loaded compaction prompt template");
            content
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unusable compaction prompt template, using default");
            DEFAULT_COMPACTION_PROMPT.to_string()
        },
    }
}
