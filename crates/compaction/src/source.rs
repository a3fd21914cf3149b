//! Read-only access to a conversation's rounds.

use std::{io::BufRead, sync::Mutex};

use crate::{
    error::{Context, Result},
    types::Round,
};

/// Supplies the full ordered round list for one conversation owner.
///
/// Calls are idempotent and may observe growth between calls. The compactor
/// never mutates what it reads.
pub trait RoundSource: Send + Sync {
    fn rounds(&self) -> Vec<Round>;

    /// Number of rounds currently recorded. Override when counting is cheaper
    /// than cloning the full list.
    fn round_count(&self) -> usize {
        self.rounds().len()
    }
}

impl<F> RoundSource for F
where
    F: Fn() -> Vec<Round> + Send + Sync,
{
    fn rounds(&self) -> Vec<Round> {
        self()
    }
}

/// Append-only in-memory round log.
#[derive(Debug, Default)]
pub struct InMemoryRounds {
    rounds: Mutex<Vec<Round>>,
}

impl InMemoryRounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rounds(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds),
        }
    }

    /// Parse a JSONL transcript, one [`Round`] per non-blank line.
    pub fn from_jsonl(reader: impl BufRead) -> Result<Self> {
        let mut rounds = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let round: Round = serde_json::from_str(&line)
                .with_context(|| format!("transcript line {}", idx + 1))?;
            rounds.push(round);
        }
        Ok(Self::from_rounds(rounds))
    }

    pub fn push(&self, round: Round) {
        self.lock().push(round);
    }

    pub fn extend(&self, rounds: impl IntoIterator<Item = Round>) {
        self.lock().extend(rounds);
    }

    /// Swap the whole log, e.g. when a conversation is reloaded.
    pub fn replace(&self, rounds: Vec<Round>) {
        *self.lock() = rounds;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Round>> {
        self.rounds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RoundSource for InMemoryRounds {
    fn rounds(&self) -> Vec<Round> {
        self.lock().clone()
    }

    fn round_count(&self) -> usize {
        self.len()
    }
}
