use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Defaults for the `stdcap` command line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Lines written by `probe`.
    pub lines: usize,
    /// Bytes per line written by `probe`, newline included.
    pub width: usize,
    /// Open-file limit used by `fd-check`.
    pub nofile_limit: u64,
    /// Captures run by `fd-check`. Zero means one more than the limit.
    pub iterations: usize,
    /// Use descriptor-level capture by default.
    pub native: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lines: 1024,
            width: 1024,
            nofile_limit: 10,
            iterations: 0,
            native: false,
        }
    }
}

impl Settings {
    /// Number of `fd-check` iterations, resolving the zero default.
    pub fn effective_iterations(&self) -> usize {
        if self.iterations == 0 {
            self.nofile_limit as usize + 1
        } else {
            self.iterations
        }
    }
}

/// Return the path to the settings file:
/// `$XDG_CONFIG_HOME/stdcap/settings.toml` (default `~/.config/stdcap/settings.toml`).
pub fn settings_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("stdcap/settings.toml")
}

/// Load settings from `path`. Returns defaults if the file is missing or invalid.
pub fn load_settings_from(path: &Path) -> Settings {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Settings::default(),
    };
    match toml::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("ignoring invalid settings file {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

/// Load settings from the default location.
pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

/// Save settings to `path`, creating parent directories as needed.
pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write settings: {}", path.display()))?;
    Ok(())
}
