//! Settings management

use ember_script::{LoadOptions, ScriptSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Server settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scripting: ScriptingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingSettings {
    /// When false no module is ever loaded and every dispatch is a no-op.
    pub enabled: bool,
    /// Directory holding the operator's scripts.
    pub module_path: PathBuf,
    /// Entry script inside `module_path`; `.js` is implied.
    pub entry: String,
    pub memory_limit_bytes: Option<usize>,
    pub max_stack_bytes: Option<usize>,
}

impl Default for ScriptingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            module_path: PathBuf::from("data/scripts"),
            entry: "bootstrap".to_string(),
            memory_limit_bytes: None,
            max_stack_bytes: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("scripting.entry must name a script")]
    EmptyEntry,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.scripting.entry_file()?;
        Ok(settings)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!(
                target: "settings",
                "No settings file at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

impl ScriptingSettings {
    /// Entry file name: trimmed, `/` separators, `.js` extension.
    pub fn entry_file(&self) -> Result<String, SettingsError> {
        normalize_entry(&self.entry)
    }

    pub fn source(&self) -> Result<ScriptSource, SettingsError> {
        Ok(ScriptSource::File(self.module_path.join(self.entry_file()?)))
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            memory_limit: self.memory_limit_bytes,
            max_stack_size: self.max_stack_bytes,
            host_api: None,
        }
    }
}

fn normalize_entry(entry: &str) -> Result<String, SettingsError> {
    let entry = entry.trim().replace('\\', "/");
    if entry.is_empty() || entry.ends_with('/') {
        return Err(SettingsError::EmptyEntry);
    }
    if entry.ends_with(".js") {
        Ok(entry)
    } else {
        Ok(format!("{entry}.js"))
    }
}
