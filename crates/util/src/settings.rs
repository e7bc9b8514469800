//! Runtime settings for the step engine.
//!
//! Settings live in a small JSON document. The location defaults to
//! `<config_dir>/stepwise/settings.json` and can be overridden with the
//! `STEPWISE_SETTINGS_PATH` environment variable. A missing file yields the
//! defaults; an unparsable file is reported with a warning and also yields
//! the defaults so that a bad edit never prevents a run from starting.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::expand_tilde;

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "STEPWISE_SETTINGS_PATH";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

const DEFAULT_SCRIPT_SLOTS: usize = 8;
const DEFAULT_SEQUENTIAL_SLOTS: usize = 4;

/// Error surfaced when reading settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O failure other than a missing file.
    #[error("settings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Capacities of the shared backend pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Concurrent scripted actions across all runs in the process.
    pub script_slots: usize,
    /// Concurrent sequential delegations across all runs in the process.
    pub sequential_slots: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            script_slots: DEFAULT_SCRIPT_SLOTS,
            sequential_slots: DEFAULT_SEQUENTIAL_SLOTS,
        }
    }
}

impl RuntimeSettings {
    /// Load settings from the default location.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let settings = match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<RuntimeSettings>(&data) {
                Ok(settings) => settings,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to parse settings file; using defaults"
                    );
                    RuntimeSettings::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => RuntimeSettings::default(),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        debug!(path = %path.display(), ?settings, "runtime settings loaded");
        Ok(settings.normalized())
    }

    /// Zero capacities would deadlock the pools, so they are raised to one.
    fn normalized(mut self) -> Self {
        self.script_slots = self.script_slots.max(1);
        self.sequential_slots = self.sequential_slots.max(1);
        self
    }
}

/// Resolve the settings path, honouring [`SETTINGS_PATH_ENV`].
pub fn default_settings_path() -> PathBuf {
    if let Ok(path) = env::var(SETTINGS_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepwise")
        .join(SETTINGS_FILE_NAME)
}
