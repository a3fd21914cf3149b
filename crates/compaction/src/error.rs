use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("compactor has no round source configured")]
    MissingRoundSource,

    #[error("compactor has no summarization backend configured")]
    MissingBackend,

    #[error("compactor must be started from within a tokio runtime")]
    NoRuntime,

    #[error("summarizer returned an empty summary")]
    EmptySummary,

    #[error("summarization backend failed: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn backend(source: anyhow::Error) -> Self {
        Self::Backend {
            source: source.into(),
        }
    }
}

impl loam_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

loam_common::impl_context!();
