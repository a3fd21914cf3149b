//! Deterministic summarizer that needs no model.
//!
//! Keeps the previous summary verbatim and appends one bullet per user query
//! found in the rendered rounds. Useful offline and for replaying transcripts.

use {
    async_trait::async_trait,
    loam_common::text::{first_line, truncate_chars},
};

use crate::{backend::SummarizationBackend, prompt::NO_PREVIOUS_SUMMARY};

const ROUND_HEADER_PREFIX: &str = "--- Round ";
const USER_QUERY_PREFIX: &str = "User Query: ";
const DEFAULT_MAX_BULLET_CHARS: usize = 320;

#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_bullet_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_bullet_chars: DEFAULT_MAX_BULLET_CHARS,
        }
    }
}

impl ExtractiveSummarizer {
    pub fn new(max_bullet_chars: usize) -> Self {
        Self { max_bullet_chars }
    }

    /// One bullet per round. Only the line right after a round header is a
    /// query; message text that happens to start with the prefix is not.
    fn bullets(&self, content: &str) -> Vec<String> {
        let mut bullets = Vec::new();
        let mut after_header = false;
        for line in content.lines() {
            if after_header
                && let Some(query) = line.strip_prefix(USER_QUERY_PREFIX).map(first_line)
                && !query.is_empty()
            {
                bullets.push(format!("- {}", truncate_chars(query, self.max_bullet_chars)));
            }
            after_header = line.starts_with(ROUND_HEADER_PREFIX) && line.ends_with(" ---");
        }
        bullets
    }
}

#[async_trait]
impl SummarizationBackend for ExtractiveSummarizer {
    async fn summarize(&self, content: &str, previous_summary: &str) -> anyhow::Result<String> {
        let bullets = self.bullets(content);
        if bullets.is_empty() {
            // Blank output; the compactor treats it as a failed pass.
            return Ok(String::new());
        }

        let mut out = String::new();
        let previous = previous_summary.trim();
        if !previous.is_empty() && previous != NO_PREVIOUS_SUMMARY {
            out.push_str(previous);
            out.push('\n');
        }
        out.push_str(&bullets.join("\n"));
        Ok(out)
    }
}
