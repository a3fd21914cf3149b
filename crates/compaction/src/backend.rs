//! Summarization backends.
//!
//! The compactor only sees [`SummarizationBackend`]. [`LlmSummarizer`] adapts
//! any chat-completion client to it; transport, retries and timeouts belong to
//! that client.

use std::sync::Arc;

use {async_trait::async_trait, loam_config::CompactionConfig, tracing::debug};

use crate::prompt::PromptTemplate;

/// Produces a new summary from freshly rendered rounds and the previous one.
///
/// An error or a blank result both count as a failed pass.
#[async_trait]
pub trait SummarizationBackend: Send + Sync {
    async fn summarize(&self, content: &str, previous_summary: &str) -> anyhow::Result<String>;
}

/// Chat message for a completion request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } => content,
        }
    }
}

/// Black-box, non-streaming chat completion client.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the assistant text of a single completion.
    async fn complete(&self, messages: &[ChatMessage], temperature: f32)
    -> anyhow::Result<String>;
}

const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes conversations.";

const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Summarizes through a chat-completion provider using a [`PromptTemplate`].
pub struct LlmSummarizer {
    provider: Arc<dyn CompletionProvider>,
    template: PromptTemplate,
    temperature: f32,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn CompletionProvider>, template: PromptTemplate) -> Self {
        Self {
            provider,
            template,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Template and temperature taken from the compaction config.
    pub fn from_config(provider: Arc<dyn CompletionProvider>, config: &CompactionConfig) -> Self {
        Self::new(provider, PromptTemplate::from_config(config)).with_temperature(config.temperature)
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// The two-message request sent for one pass.
    pub fn build_messages(&self, content: &str, previous_summary: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(SUMMARIZER_SYSTEM_PROMPT),
            ChatMessage::user(self.template.render(content, previous_summary)),
        ]
    }
}

#[async_trait]
impl SummarizationBackend for LlmSummarizer {
    async fn summarize(&self, content: &str, previous_summary: &str) -> anyhow::Result<String> {
        let messages = self.build_messages(content, previous_summary);
        debug!(
            provider = self.provider.name(),
            prompt_chars = messages[1].content().len(),
            "requesting compaction summary"
        );
        self.provider.complete(&messages, self.temperature).await
    }
}
