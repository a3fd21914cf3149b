use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::LoamConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["loam.toml", "loam.yaml", "loam.yml", "loam.json"];

/// Load config from the given path (any supported format).
///
/// A relative `compaction.prompt_template_path` is resolved against the
/// directory holding the config file.
pub fn load_config(path: &Path) -> anyhow::Result<LoamConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;

    if let Some(template) = config.compaction.prompt_template_path.as_mut()
        && template.is_relative()
        && let Some(parent) = path.parent()
    {
        *template = parent.join(&*template);
    }

    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./loam.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/loam/loam.{toml,yaml,yml,json}` (user-global)
///
/// Returns `LoamConfig::default()` if no config file is found or the one found
/// cannot be parsed.
pub fn discover_and_load() -> LoamConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    LoamConfig::default()
}

/// Load `path` when given, otherwise fall back to [`discover_and_load`].
pub fn load_or_discover(path: Option<&Path>) -> anyhow::Result<LoamConfig> {
    match path {
        Some(p) => load_config(p),
        None => Ok(discover_and_load()),
    }
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/loam/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "loam").map(|d| d.config_dir().to_path_buf())
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> anyhow::Result<LoamConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
