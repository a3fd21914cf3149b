//! Config schema types for the compaction engine.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoamConfig {
    pub compaction: CompactionConfig,
}

/// Background compaction settings.
///
/// All fields are optional in config files; missing keys take the defaults
/// below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Master switch. A disabled engine never spawns a worker and ignores
    /// every notification.
    pub enabled: bool,
    /// Minimum number of not-yet-summarized rounds before a pass is started.
    pub threshold: usize,
    /// Most recent rounds that always stay out of the summary.
    pub retain_recent: usize,
    /// YAML file whose `content` key replaces the built-in prompt.
    /// Relative paths are resolved against the config file's directory.
    pub prompt_template_path: Option<PathBuf>,
    /// Per-message character bound when building the text to summarize.
    pub preview_chars: usize,
    /// How long `stop()` waits for the worker before giving up on it.
    pub stop_timeout_secs: u64,
    /// Sampling temperature for LLM-backed summarizers.
    pub temperature: f32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 10,
            retain_recent: 3,
            prompt_template_path: None,
            preview_chars: 500,
            stop_timeout_secs: 5,
            temperature: 0.3,
        }
    }
}

impl CompactionConfig {
    /// Default settings with the engine switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
