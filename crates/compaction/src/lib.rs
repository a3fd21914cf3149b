//! Background compaction of long conversations.
//!
//! Older rounds are folded into one accumulating summary by a background
//! worker, while the most recent rounds stay verbatim. Callers signal new
//! rounds with `notify_rounds_changed` and read the latest published summary
//! with `get_compaction`; neither ever waits on the summarizer.

pub mod backend;
pub mod compactor;
pub mod error;
pub mod extractive;
pub mod prompt;
pub mod source;
pub mod types;
pub mod view;

pub use {
    backend::{ChatMessage, CompletionProvider, LlmSummarizer, SummarizationBackend},
    compactor::{
        CompactionEvent, CompactionProvider, ContextCompactor, ContextCompactorBuilder, EventFn,
    },
    error::{Error, Result},
    extractive::ExtractiveSummarizer,
    prompt::{PromptTemplate, build_compaction_content},
    source::{InMemoryRounds, RoundSource},
    types::{CompactedSummary, Message, Round},
    view::{CompactedContext, compacted_context},
};
