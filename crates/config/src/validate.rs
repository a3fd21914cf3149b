//! Configuration validation.
//!
//! Parses a config file and reports problems with the compaction settings
//! that would make the engine misbehave or silently no-op.

use std::path::{Path, PathBuf};

use crate::{
    loader::{find_config_file, load_config},
    schema::CompactionConfig,
    template::{CONTENT_PLACEHOLDER, read_prompt_template},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "range", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "compaction.threshold"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Validate the config file at `path`, or the discovered one when `None`.
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path.map(Path::to_path_buf).or_else(find_config_file);

    let Some(ref actual_path) = config_path else {
        let mut diagnostics = vec![Diagnostic::new(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        )];
        diagnostics.extend(validate_compaction(&CompactionConfig::default()));
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    let diagnostics = match load_config(actual_path) {
        Ok(config) => validate_compaction(&config.compaction),
        Err(e) => vec![Diagnostic::new(
            Severity::Error,
            "syntax",
            "",
            format!("failed to load config file: {e}"),
        )],
    };

    ValidationResult {
        diagnostics,
        config_path,
    }
}

/// Semantic checks on an already-parsed compaction section.
pub fn validate_compaction(cfg: &CompactionConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    if !cfg.enabled {
        out.push(Diagnostic::new(
            Severity::Info,
            "range",
            "compaction.enabled",
            "compaction is disabled; summaries will never be produced",
        ));
    }

    if cfg.threshold == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "range",
            "compaction.threshold",
            "threshold must be at least 1",
        ));
    } else if cfg.retain_recent >= cfg.threshold {
        out.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "compaction.retain_recent",
            format!(
                "retain_recent ({}) >= threshold ({}); triggered passes may have nothing to cover",
                cfg.retain_recent, cfg.threshold
            ),
        ));
    }

    if cfg.preview_chars == 0 {
        out.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "compaction.preview_chars",
            "preview_chars is 0; message text will be dropped from summaries",
        ));
    }

    if !(0.0..=2.0).contains(&cfg.temperature) {
        out.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "compaction.temperature",
            format!("temperature {} is outside 0.0..=2.0", cfg.temperature),
        ));
    }

    if let Some(ref template) = cfg.prompt_template_path {
        match read_prompt_template(template) {
            Ok(content) if !content.contains(CONTENT_PLACEHOLDER) => {
                out.push(Diagnostic::new(
                    Severity::Warning,
                    "file-ref",
                    "compaction.prompt_template_path",
                    format!(
                        "{} never references {CONTENT_PLACEHOLDER}; rounds will not reach the summarizer",
                        template.display()
                    ),
                ));
            },
            Ok(_) => {},
            Err(e) => out.push(Diagnostic::new(
                Severity::Warning,
                "file-ref",
                "compaction.prompt_template_path",
                format!("{e}; the built-in prompt will be used"),
            )),
        }
    }

    out
}
