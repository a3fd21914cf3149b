//! Configuration loading, validation, env substitution, and prompt templates.
//!
//! Config files: `loam.toml`, `loam.yaml`, or `loam.json`
//! Searched in `./` then `~/.config/loam/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw
//! file text.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, load_config, load_or_discover},
    schema::{CompactionConfig, LoamConfig},
    template::{DEFAULT_COMPACTION_PROMPT, load_prompt_template},
    validate::{Diagnostic, Severity, ValidationResult},
};
